// ─── Server Orchestrator Core ───
// Single-server process orchestration for JVM game servers.
//
// Architecture:
//   core/
//     catalog/    - Local binary tree scan, version ordering, materialize
//     launch/     - LaunchConfig, argument vector, server.properties rewrite
//     process/    - ProcessSupervisor slot + ManagedInstance lifecycle
//     automaton/  - Post-boot rule application over server output
//     state/      - Persisted orchestrator settings

pub mod automaton;
pub mod catalog;
pub mod error;
pub mod launch;
pub mod process;
pub mod state;

mod commands;
pub mod core;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub use crate::core::automaton::{PostBootAutomaton, ProbePatterns, RuleSource, RuleSpec};
pub use crate::core::catalog::{BinaryEntry, VersionCatalog};
pub use crate::core::error::{OrchestratorError, OrchestratorResult, EXIT_STATUS_ABNORMAL};
pub use crate::core::launch::{LaunchConfig, LaunchConfigProvider};
pub use crate::core::process::{ManagedInstance, OutputSink, ProcessSupervisor, StreamOrigin};
pub use crate::core::state::OrchestratorSettings;

/// Entry point of the `server-orchestrator` binary. Returns the exit status.
pub fn run() -> i32 {
    // Server output owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server_orchestrator_lib=debug")),
        )
        .init();

    let cli = commands::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Cannot start async runtime: {}", e);
            return 1;
        }
    };

    let status = match runtime.block_on(commands::execute(cli)) {
        Ok(status) => status,
        Err(e) => {
            tracing::error!("{}", e);
            1
        }
    };

    // The stdin reader blocks a runtime thread until the next line.
    runtime.shutdown_background();
    status
}

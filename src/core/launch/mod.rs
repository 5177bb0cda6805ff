pub mod args;
pub mod config;
pub mod properties;

pub use args::{build_server_args, format_command_for_logs, server_command};
pub use config::{LaunchConfig, LaunchConfigProvider};
pub use properties::{accept_eula, world_name_for_version, write_level_name};

pub mod instance;
pub mod output;
pub mod supervisor;

pub use instance::{ExitCallback, InstanceStatus, ManagedInstance};
pub use output::{ChannelSink, CommandSink, OutputSink, StreamOrigin, TracingSink};
pub use supervisor::{ProcessSupervisor, GRACEFUL_STOP_COMMAND, RUNTIME_BINARY_NAME};

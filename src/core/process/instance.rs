use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::output::{forward_lines, OutputSink, StreamOrigin};
use crate::core::error::EXIT_STATUS_ABNORMAL;
use crate::core::launch::LaunchConfig;

/// Invoked once with `(instance name, exit status)`.
pub type ExitCallback = Box<dyn FnOnce(&str, i32) + Send + 'static>;

/// How long the watcher waits for the output streams to drain after exit.
const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serializable snapshot of the running instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub id: Uuid,
    pub display_name: String,
    pub pid: Option<u32>,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

/// One spawned server process.
///
/// `running` flips to `false` exactly once, when the exit watcher observes
/// termination. Commands go through a single channel so they reach stdin in
/// submission order.
pub struct ManagedInstance {
    id: Uuid,
    display_name: String,
    launch_config: LaunchConfig,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    running: AtomicBool,
    commands: mpsc::UnboundedSender<String>,
    kill_signal: Notify,
    exit_rx: watch::Receiver<Option<i32>>,
    stop_hooks: Mutex<Option<Vec<ExitCallback>>>,
}

/// Process handles moved into the background tasks by [`ManagedInstance::supervise`].
pub(crate) struct InstanceIo {
    child: Child,
    commands_rx: mpsc::UnboundedReceiver<String>,
    exit_tx: watch::Sender<Option<i32>>,
}

impl ManagedInstance {
    /// Wrap a freshly spawned child. No task runs until `supervise` is called,
    /// which lets the owner publish the instance first.
    pub(crate) fn attach(
        display_name: String,
        launch_config: LaunchConfig,
        child: Child,
    ) -> (Arc<Self>, InstanceIo) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let instance = Arc::new(Self {
            id: Uuid::new_v4(),
            display_name,
            launch_config,
            pid: child.id(),
            started_at: Utc::now(),
            running: AtomicBool::new(true),
            commands,
            kill_signal: Notify::new(),
            exit_rx,
            stop_hooks: Mutex::new(Some(Vec::new())),
        });

        let io = InstanceIo {
            child,
            commands_rx,
            exit_tx,
        };

        (instance, io)
    }

    /// Start the stdout/stderr forwarders, the stdin writer and the exit
    /// watcher. On exit the watcher task runs `on_complete`, then the stop
    /// hooks, and only then resolves `wait_for_exit`.
    pub(crate) fn supervise(
        self: &Arc<Self>,
        io: InstanceIo,
        sink: Arc<dyn OutputSink>,
        on_complete: Box<dyn FnOnce(i32) + Send + 'static>,
    ) {
        let InstanceIo {
            mut child,
            commands_rx,
            exit_tx,
        } = io;

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(
                stdout,
                StreamOrigin::Stdout,
                sink.clone(),
                self.display_name.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(
                stderr,
                StreamOrigin::Stderr,
                sink,
                self.display_name.clone(),
            )));
        }

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_commands(
                stdin,
                commands_rx,
                self.display_name.clone(),
            ));
        }

        let instance = Arc::clone(self);
        tokio::spawn(async move {
            let status = tokio::select! {
                result = child.wait() => result,
                _ = instance.kill_signal.notified() => {
                    if let Err(e) = child.start_kill() {
                        debug!("[server:{}] kill after exit: {}", instance.display_name, e);
                    }
                    child.wait().await
                }
            };

            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    error!(
                        "[server:{}] exit watcher failed: {}",
                        instance.display_name, e
                    );
                    EXIT_STATUS_ABNORMAL
                }
            };

            for forwarder in forwarders {
                if tokio::time::timeout(STREAM_DRAIN_TIMEOUT, forwarder)
                    .await
                    .is_err()
                {
                    warn!(
                        "[server:{}] output stream still open after exit",
                        instance.display_name
                    );
                }
            }

            instance.running.store(false, Ordering::Release);
            info!(
                "[server:{}] process exited with status {}",
                instance.display_name, code
            );

            if catch_unwind(AssertUnwindSafe(|| on_complete(code))).is_err() {
                error!(
                    "[server:{}] exit callback panicked",
                    instance.display_name
                );
            }
            instance.fire_stop_hooks(code);
            let _ = exit_tx.send(Some(code));
        });
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn launch_config(&self) -> &LaunchConfig {
        &self.launch_config
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            id: self.id,
            display_name: self.display_name.clone(),
            pid: self.pid,
            port: self.launch_config.port(),
            started_at: self.started_at,
            running: self.is_running(),
        }
    }

    /// Queue `text` for the server's stdin. Ignored once the process is gone.
    pub fn send(&self, text: &str) {
        if !self.is_running() {
            return;
        }
        if self.commands.send(text.to_string()).is_err() {
            debug!("[server:{}] stdin closed, dropping command", self.display_name);
        }
    }

    /// Forcibly terminate the process. Calling it again is harmless.
    pub fn kill(&self) {
        if self.is_running() {
            self.kill_signal.notify_one();
        }
    }

    /// Register a one-shot hook fired after the exit callback. Returns
    /// `false` when the instance already finished.
    pub fn add_stop_hook(&self, hook: ExitCallback) -> bool {
        let mut hooks = self.stop_hooks.lock().unwrap_or_else(|e| e.into_inner());
        match hooks.as_mut() {
            Some(pending) => {
                pending.push(hook);
                true
            }
            None => false,
        }
    }

    /// Resolve to the exit status once the process has ended.
    pub async fn wait_for_exit(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        let code = match rx.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(EXIT_STATUS_ABNORMAL),
            Err(_) => EXIT_STATUS_ABNORMAL,
        };
        code
    }

    fn fire_stop_hooks(&self, code: i32) {
        let hooks = self
            .stop_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();

        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(&self.display_name, code))).is_err() {
                error!("[server:{}] stop hook panicked", self.display_name);
            }
        }
    }
}

async fn write_commands(
    mut stdin: ChildStdin,
    mut commands: mpsc::UnboundedReceiver<String>,
    instance_name: String,
) {
    while let Some(command) = commands.recv().await {
        debug!("[server:{}][stdin] {}", instance_name, command);
        let mut line = command.into_bytes();
        line.push(b'\n');

        if let Err(e) = stdin.write_all(&line).await {
            warn!("[server:{}] cannot write to stdin: {}", instance_name, e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("[server:{}] cannot flush stdin: {}", instance_name, e);
            break;
        }
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(EXIT_STATUS_ABNORMAL)
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_STATUS_ABNORMAL)
}

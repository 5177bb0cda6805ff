use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info, warn};

use super::instance::{ExitCallback, InstanceStatus, ManagedInstance};
use super::output::{CommandSink, OutputSink};
use crate::core::catalog::{materialize, VersionCatalog};
use crate::core::error::{OrchestratorError, OrchestratorResult, EXIT_STATUS_ABNORMAL};
use crate::core::launch::{self, LaunchConfig};

/// File name the selected binary is copied to inside the runtime root.
pub const RUNTIME_BINARY_NAME: &str = "server.jar";

/// Command that asks the server to save and shut down.
pub const GRACEFUL_STOP_COMMAND: &str = "stop";

/// Single-occupancy slot for the running instance.
///
/// `reserved` is claimed by compare-and-set at the top of `start` and only
/// released once the previous instance's exit has been fully reported, so
/// two starts can never both spawn. `current` is written only on publish and
/// release, never while a start is doing its slow work.
#[derive(Default)]
struct InstanceSlot {
    reserved: AtomicBool,
    current: RwLock<Option<Arc<ManagedInstance>>>,
}

impl InstanceSlot {
    fn try_reserve(&self) -> bool {
        self.reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn publish(&self, instance: Arc<ManagedInstance>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(instance);
    }

    fn current(&self) -> Option<Arc<ManagedInstance>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn release(&self) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.reserved.store(false, Ordering::Release);
    }
}

/// Releases a reservation unless the start reached the spawn step.
struct Reservation<'a> {
    slot: &'a InstanceSlot,
    armed: bool,
}

impl Reservation<'_> {
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.release();
        }
    }
}

/// Frees the slot when dropped, so a panicking exit callback cannot wedge it.
struct ReleaseOnDrop(Arc<InstanceSlot>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Owns at most one running server process.
pub struct ProcessSupervisor {
    catalog: VersionCatalog,
    runtime_root: PathBuf,
    slot: Arc<InstanceSlot>,
}

impl ProcessSupervisor {
    pub fn new(catalog: VersionCatalog, runtime_root: PathBuf) -> Self {
        Self {
            catalog,
            runtime_root,
            slot: Arc::new(InstanceSlot::default()),
        }
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    pub fn runtime_root(&self) -> &Path {
        &self.runtime_root
    }

    pub fn runtime_binary_path(&self) -> PathBuf {
        self.runtime_root.join(RUNTIME_BINARY_NAME)
    }

    /// Resolve, install and launch a server, returning the configured port.
    ///
    /// Fails synchronously with `AlreadyRunning` or `NotFound`. A spawn
    /// failure is not an error here: `on_exit` receives `-1` from a
    /// background task instead. `on_exit` fires exactly once per successful
    /// return, after which the slot is free for the next start.
    pub async fn start(
        &self,
        server_type: &str,
        version: &str,
        build: Option<u32>,
        launch_config: LaunchConfig,
        output: Arc<dyn OutputSink>,
        on_exit: ExitCallback,
    ) -> OrchestratorResult<u16> {
        if !self.slot.try_reserve() {
            let running = self
                .slot
                .current()
                .map(|i| i.display_name().to_string())
                .unwrap_or_else(|| "start in progress".into());
            return Err(OrchestratorError::AlreadyRunning(running));
        }
        let reservation = Reservation {
            slot: self.slot.as_ref(),
            armed: true,
        };

        let entry = self.catalog.resolve(server_type, version, build).await?;
        let display_name = entry.display_name();
        let port = launch_config.port();

        tokio::fs::create_dir_all(&self.runtime_root)
            .await
            .map_err(|source| OrchestratorError::Io {
                path: self.runtime_root.clone(),
                source,
            })?;

        let server_jar = self.runtime_binary_path();
        materialize(&entry, &server_jar).await?;
        launch::write_level_name(&self.runtime_root, &entry.version).await?;
        if launch_config.auto_accept_license() {
            launch::accept_eula(&self.runtime_root).await?;
        }
        warn_if_memory_exceeds_host(launch_config.memory_mb());

        let mut cmd = launch::server_command(&launch_config, &server_jar, &self.runtime_root);
        info!(
            "Launching {} on port {} with {:?}",
            display_name,
            port,
            launch_config.executable_path()
        );
        debug!(
            "Command (copy/paste): {}",
            launch::format_command_for_logs(cmd.as_std())
        );

        reservation.keep();

        match cmd.spawn() {
            Ok(child) => {
                let (instance, io) = ManagedInstance::attach(display_name, launch_config, child);
                self.slot.publish(Arc::clone(&instance));

                let release = ReleaseOnDrop(Arc::clone(&self.slot));
                let name = instance.display_name().to_string();
                instance.supervise(
                    io,
                    output,
                    Box::new(move |code| {
                        let _release = release;
                        on_exit(&name, code);
                    }),
                );
                info!("Server {} running (pid {:?})", instance.display_name(), instance.pid());
            }
            Err(e) => {
                error!("Cannot spawn {}: {}", display_name, e);
                let release = ReleaseOnDrop(Arc::clone(&self.slot));
                tokio::spawn(async move {
                    let _release = release;
                    on_exit(&display_name, EXIT_STATUS_ABNORMAL);
                });
            }
        }

        Ok(port)
    }

    /// Write `text` followed by a newline to the server's stdin.
    /// Does nothing when no server is running.
    pub fn send_command(&self, text: &str) {
        if let Some(instance) = self.slot.current() {
            instance.send(text);
        }
    }

    /// Ask the server to shut down gracefully. Does not wait for exit.
    pub fn stop(&self) {
        self.send_command(GRACEFUL_STOP_COMMAND);
    }

    /// Forcibly terminate the running server, if any.
    pub fn kill(&self) {
        if let Some(instance) = self.slot.current() {
            warn!("Killing server {}", instance.display_name());
            instance.kill();
        }
    }

    /// Attach a one-shot hook that fires after the current instance's exit
    /// callback. Returns `false` when nothing is running.
    pub fn on_next_exit(&self, hook: ExitCallback) -> bool {
        match self.slot.current() {
            Some(instance) => instance.add_stop_hook(hook),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.current().is_some_and(|i| i.is_running())
    }

    pub fn current_instance(&self) -> Option<Arc<ManagedInstance>> {
        self.slot.current()
    }

    pub fn status(&self) -> Option<InstanceStatus> {
        self.slot.current().map(|i| i.status())
    }
}

impl CommandSink for ProcessSupervisor {
    fn send_command(&self, text: &str) {
        ProcessSupervisor::send_command(self, text);
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Some(instance) = self.slot.current() {
            if instance.is_running() {
                warn!(
                    "Supervisor dropped with {} still running; killing it",
                    instance.display_name()
                );
                instance.kill();
            }
        }
    }
}

fn warn_if_memory_exceeds_host(memory_mb: u32) {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total_mb = system.total_memory() / (1024 * 1024);

    if total_mb > 0 && u64::from(memory_mb) > total_mb {
        warn!(
            "Requested heap of {} MB exceeds host memory of {} MB",
            memory_mb, total_mb
        );
    }
}

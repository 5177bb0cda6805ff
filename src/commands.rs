use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::automaton::{PostBootAutomaton, ProbePatterns, ProbeTimings, RuleSpec};
use crate::core::catalog::VersionCatalog;
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::launch::{LaunchConfig, LaunchConfigProvider};
use crate::core::process::{
    CommandSink, OutputSink, ProcessSupervisor, StreamOrigin, TracingSink,
};
use crate::core::state::OrchestratorSettings;

/// Operator console commands understood while a server runs.
const CONSOLE_STOP: &str = "!stop";
const CONSOLE_KILL: &str = "!kill";
const CONSOLE_RESTART: &str = "!restart";

const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "server-orchestrator",
    version,
    about = "Run a single game server from a local binary catalog"
)]
pub struct Cli {
    /// Settings file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a server and attach the console until it exits
    Run(RunArgs),
    /// List server types found in the binaries directory
    Types,
    /// List versions of a server type, newest first
    Versions { server_type: String },
    /// List builds of a version, newest first
    Builds { server_type: String, version: String },
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    pub server_type: String,
    pub version: String,

    /// Exact build number; the build-less or newest local build otherwise
    #[arg(long)]
    pub build: Option<u32>,

    /// Override the configured port
    #[arg(long)]
    pub port: Option<u32>,

    /// Override the configured heap size in MB
    #[arg(long)]
    pub memory: Option<u32>,

    /// Accept the server EULA for this launch
    #[arg(long)]
    pub accept_eula: bool,

    /// Send server output to the log instead of stdout
    #[arg(long)]
    pub log_output: bool,
}

/// Run the parsed command, returning the process exit status.
pub async fn execute(cli: Cli) -> OrchestratorResult<i32> {
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(OrchestratorSettings::default_path);
    let settings = OrchestratorSettings::load(&settings_path);
    debug!("Using settings from {:?}", settings_path);

    let catalog = VersionCatalog::new(settings.binaries_dir.clone());

    match cli.command {
        Command::Types => {
            for server_type in catalog.list_types().await? {
                println!("{server_type}");
            }
            Ok(0)
        }
        Command::Versions { server_type } => {
            for version in catalog.list_versions(&server_type).await? {
                println!("{version}");
            }
            Ok(0)
        }
        Command::Builds {
            server_type,
            version,
        } => {
            for build in catalog.list_builds(&server_type, &version).await? {
                println!("{build}");
            }
            Ok(0)
        }
        Command::Run(args) => serve(settings, catalog, args).await,
    }
}

// ─── Console output ───

/// Prints server lines through a blocking writer so forwarder tasks never
/// wait on the terminal.
struct ConsoleSink {
    tx: mpsc::UnboundedSender<(StreamOrigin, String)>,
}

impl OutputSink for ConsoleSink {
    fn on_line(&self, origin: StreamOrigin, line: &str) {
        let _ = self.tx.send((origin, line.to_string()));
    }
}

fn spawn_console_writer() -> (ConsoleSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(StreamOrigin, String)>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some((origin, line)) = rx.blocking_recv() {
            let _ = match origin {
                StreamOrigin::Stdout => writeln!(out, "{line}"),
                StreamOrigin::Stderr => writeln!(err, "{line}"),
            };
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (ConsoleSink { tx }, handle)
}

// ─── Session ───

/// Everything needed to (re)start the same server.
struct Session {
    supervisor: Arc<ProcessSupervisor>,
    server_type: String,
    version: String,
    build: Option<u32>,
    launch_config: LaunchConfig,
    rules: Vec<RuleSpec>,
    patterns: ProbePatterns,
    timings: ProbeTimings,
    console: Arc<dyn OutputSink>,
    exit_tx: mpsc::UnboundedSender<i32>,
}

impl Session {
    async fn launch(&self) -> OrchestratorResult<u16> {
        let commands: Arc<dyn CommandSink> = self.supervisor.clone();
        let (automaton, report) = PostBootAutomaton::spawn(
            self.rules.clone(),
            self.patterns.clone(),
            self.timings,
            commands,
            Arc::clone(&self.console),
        );

        tokio::spawn(async move {
            if let Ok(report) = report.await {
                info!(
                    "Rule pass finished: {}/{} applied (complete: {})",
                    report.applied(),
                    report.rules.len(),
                    report.completed
                );
                if let Ok(json) = serde_json::to_string(&report) {
                    debug!("Rule report: {}", json);
                }
            }
        });

        let exit_tx = self.exit_tx.clone();
        self.supervisor
            .start(
                &self.server_type,
                &self.version,
                self.build,
                self.launch_config.clone(),
                automaton,
                Box::new(move |name: &str, code: i32| {
                    info!("Server {} exited with status {}", name, code);
                    let _ = exit_tx.send(code);
                }),
            )
            .await
    }
}

async fn serve(
    settings: OrchestratorSettings,
    catalog: VersionCatalog,
    args: RunArgs,
) -> OrchestratorResult<i32> {
    let settings = OrchestratorSettings {
        port: args.port.unwrap_or(settings.port),
        memory_mb: args.memory.unwrap_or(settings.memory_mb),
        auto_accept_eula: settings.auto_accept_eula || args.accept_eula,
        ..settings
    };
    let launch_config = settings.launch_config()?;

    let rules = match settings.rule_source().load_rules().await {
        Ok(rules) => rules,
        Err(e) => {
            warn!("Starting without rules: {}", e);
            Vec::new()
        }
    };

    let (console_sink, writer) = spawn_console_writer();
    let console: Arc<dyn OutputSink> = if args.log_output {
        Arc::new(TracingSink::new(format!("{} {}", args.server_type, args.version)))
    } else {
        Arc::new(console_sink)
    };
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let session = Session {
        supervisor: Arc::new(ProcessSupervisor::new(catalog, settings.runtime_dir.clone())),
        server_type: args.server_type,
        version: args.version,
        build: args.build,
        launch_config,
        rules,
        patterns: settings.probe_patterns()?,
        timings: settings.probe_timings(),
        console,
        exit_tx,
    };

    let port = session.launch().await?;
    info!("Server listening on port {}", port);

    let status = attach_console(&session, &mut exit_rx).await?;

    drop(session);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await.is_err() {
        debug!("Console writer still busy at shutdown");
    }
    Ok(status)
}

/// Forward operator input until the server exits for good.
async fn attach_console(
    session: &Session,
    exit_rx: &mut mpsc::UnboundedReceiver<i32>,
) -> OrchestratorResult<i32> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut interrupted = false;
    let (restart_tx, mut restart_rx) = mpsc::unbounded_channel::<()>();
    let mut restart_pending = false;

    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    match line {
                        "" => {}
                        CONSOLE_STOP => session.supervisor.stop(),
                        CONSOLE_KILL => session.supervisor.kill(),
                        CONSOLE_RESTART => {
                            let tx = restart_tx.clone();
                            let hooked = session.supervisor.on_next_exit(Box::new(
                                move |_: &str, _: i32| {
                                    let _ = tx.send(());
                                },
                            ));
                            if hooked {
                                info!("Restarting server");
                                restart_pending = true;
                                session.supervisor.stop();
                            } else {
                                session.launch().await?;
                            }
                        }
                        command => session.supervisor.send_command(command),
                    }
                }
                Ok(None) => {
                    debug!("Operator input closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Cannot read operator input: {}", e);
                    stdin_open = false;
                }
            },
            code = exit_rx.recv() => {
                let code = code.ok_or_else(|| {
                    OrchestratorError::AbnormalExit("exit notification lost".into())
                })?;

                if !restart_pending {
                    return Ok(code);
                }
                restart_pending = false;
                if restart_rx.recv().await.is_some() {
                    session.launch().await?;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    warn!("Second interrupt, killing server");
                    session.supervisor.kill();
                } else {
                    info!("Interrupt received, stopping server (again to kill)");
                    interrupted = true;
                    restart_pending = false;
                    session.supervisor.stop();
                }
            }
        }
    }
}

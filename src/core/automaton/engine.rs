// ─── Post-Boot Rules ───
// The automaton sits between the process forwarders and the real output
// sink. Forwarder tasks only enqueue lines; every state transition happens
// on one scheduler task so probes are strictly serialized.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::patterns::ProbePatterns;
use super::rules::RuleSpec;
use crate::core::error::OrchestratorError;
use crate::core::process::{CommandSink, OutputSink, StreamOrigin};

/// Prefix of the informational lines the automaton writes to the console.
pub const REPORT_PREFIX: &str = "[rules]";

const PHASE_IDLE: u8 = 0;
const PHASE_APPLYING: u8 = 1;
const PHASE_FINISHED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimings {
    /// Window after a probe in which an error line counts against it.
    pub probe_timeout: Duration,
    /// Pause between one rule's outcome and the next rule's first probe.
    pub inter_rule_delay: Duration,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(650),
            inter_rule_delay: Duration::from_millis(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomatonPhase {
    Idle,
    Applying,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RuleOutcome {
    /// No error line arrived within the probe window.
    Applied { via: String },
    /// The server rejected the value; aliases were not tried.
    InvalidValue { via: String },
    /// Every name was reported unknown.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: String,
    pub value: String,
    pub outcome: RuleOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutomatonReport {
    pub rules: Vec<RuleReport>,
    /// False when the server output ended before every rule was attempted.
    pub completed: bool,
}

impl AutomatonReport {
    pub fn applied(&self) -> usize {
        self.rules
            .iter()
            .filter(|r| matches!(r.outcome, RuleOutcome::Applied { .. }))
            .count()
    }
}

/// Output sink decorator that applies rules once the server reports ready.
pub struct PostBootAutomaton {
    next: Arc<dyn OutputSink>,
    events: mpsc::UnboundedSender<String>,
    phase: Arc<AtomicU8>,
    /// Set while a probe awaits its outcome; only then are echoes hidden.
    probing: Arc<AtomicBool>,
    patterns: Arc<ProbePatterns>,
}

impl PostBootAutomaton {
    /// Build the automaton and start its scheduler task.
    ///
    /// Probes are issued through `commands`; every line seen is forwarded to
    /// `next`. The receiver resolves once the scheduler stops.
    pub fn spawn(
        rules: Vec<RuleSpec>,
        patterns: ProbePatterns,
        timings: ProbeTimings,
        commands: Arc<dyn CommandSink>,
        next: Arc<dyn OutputSink>,
    ) -> (Arc<Self>, oneshot::Receiver<AutomatonReport>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = oneshot::channel();
        let phase = Arc::new(AtomicU8::new(PHASE_IDLE));
        let probing = Arc::new(AtomicBool::new(false));
        let patterns = Arc::new(patterns);

        let scheduler = Scheduler {
            rules,
            patterns: Arc::clone(&patterns),
            timings,
            commands,
            console: Arc::clone(&next),
            phase: Arc::clone(&phase),
            probing: Arc::clone(&probing),
            state: AutomatonState::Idle,
            reports: Vec::new(),
        };
        tokio::spawn(scheduler.run(events_rx, report_tx));

        let automaton = Arc::new(Self {
            next,
            events,
            phase,
            probing,
            patterns,
        });
        (automaton, report_rx)
    }

    pub fn phase(&self) -> AutomatonPhase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_IDLE => AutomatonPhase::Idle,
            PHASE_APPLYING => AutomatonPhase::Applying,
            _ => AutomatonPhase::Finished,
        }
    }
}

impl OutputSink for PostBootAutomaton {
    fn on_line(&self, origin: StreamOrigin, line: &str) {
        let phase = self.phase.load(Ordering::Acquire);
        if phase != PHASE_FINISHED {
            let _ = self.events.send(line.to_string());
        }

        if self.probing.load(Ordering::Acquire) && self.patterns.is_probe_echo(line) {
            return;
        }
        self.next.on_line(origin, line);
    }
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    AwaitingOutcome(Instant),
    BetweenRules(Instant),
}

#[derive(Debug, Clone, Copy)]
struct Probe {
    rule: usize,
    alias: usize,
    timer: Timer,
}

#[derive(Debug, Clone, Copy)]
enum AutomatonState {
    Idle,
    Applying(Probe),
    Finished,
}

struct Scheduler {
    rules: Vec<RuleSpec>,
    patterns: Arc<ProbePatterns>,
    timings: ProbeTimings,
    commands: Arc<dyn CommandSink>,
    console: Arc<dyn OutputSink>,
    phase: Arc<AtomicU8>,
    probing: Arc<AtomicBool>,
    state: AutomatonState,
    reports: Vec<RuleReport>,
}

impl Scheduler {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<String>,
        done: oneshot::Sender<AutomatonReport>,
    ) {
        while !matches!(self.state, AutomatonState::Finished) {
            let deadline = match self.state {
                AutomatonState::Applying(Probe {
                    timer: Timer::AwaitingOutcome(at) | Timer::BetweenRules(at),
                    ..
                }) => Some(at),
                _ => None,
            };

            tokio::select! {
                line = events.recv() => match line {
                    Some(line) => self.handle_line(&line),
                    None => {
                        warn!("Server output ended before all rules were applied");
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_timer();
                }
            }
        }

        let completed = matches!(self.state, AutomatonState::Finished);
        self.probing.store(false, Ordering::Release);
        self.phase.store(PHASE_FINISHED, Ordering::Release);

        let report = AutomatonReport {
            rules: self.reports,
            completed,
        };
        if done.send(report).is_err() {
            debug!("Rule report dropped, nobody is listening");
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.state {
            AutomatonState::Idle => {
                if self.patterns.is_ready(line) {
                    info!("Server ready, applying {} rules", self.rules.len());
                    self.phase.store(PHASE_APPLYING, Ordering::Release);
                    self.begin_rule(0);
                }
            }
            AutomatonState::Applying(probe) => {
                // Lines arriving between rules belong to no probe.
                if !matches!(probe.timer, Timer::AwaitingOutcome(_)) {
                    return;
                }
                if self.patterns.is_unknown_identifier(line) {
                    self.try_next_alias(probe);
                } else if self.patterns.is_invalid_value(line) {
                    let rule = &self.rules[probe.rule];
                    let via = rule.name_at(probe.alias).unwrap_or_default().to_string();
                    self.announce(&format!(
                        "{} rejected value '{}' for {}",
                        REPORT_PREFIX,
                        rule.value(),
                        via
                    ));
                    self.record(probe.rule, RuleOutcome::InvalidValue { via });
                    self.schedule_next_rule(probe);
                }
            }
            AutomatonState::Finished => {}
        }
    }

    fn handle_timer(&mut self) {
        let AutomatonState::Applying(probe) = self.state else {
            return;
        };

        match probe.timer {
            Timer::AwaitingOutcome(_) => {
                let rule = &self.rules[probe.rule];
                let via = rule.name_at(probe.alias).unwrap_or_default().to_string();
                debug!("Rule {} = {} applied via {}", rule.canonical_name(), rule.value(), via);
                self.record(probe.rule, RuleOutcome::Applied { via });
                self.schedule_next_rule(probe);
            }
            Timer::BetweenRules(_) => self.begin_rule(probe.rule + 1),
        }
    }

    fn begin_rule(&mut self, index: usize) {
        if index >= self.rules.len() {
            self.finish();
            return;
        }
        self.issue_probe(index, 0);
    }

    fn issue_probe(&mut self, rule: usize, alias: usize) {
        let spec = &self.rules[rule];
        let Some(name) = spec.name_at(alias) else {
            return;
        };

        let command = self.patterns.render_command(name, spec.value());
        debug!("Probing rule {} with '{}'", spec.canonical_name(), command);
        self.probing.store(true, Ordering::Release);
        self.commands.send_command(&command);

        self.state = AutomatonState::Applying(Probe {
            rule,
            alias,
            timer: Timer::AwaitingOutcome(Instant::now() + self.timings.probe_timeout),
        });
    }

    fn try_next_alias(&mut self, probe: Probe) {
        let next_alias = probe.alias + 1;
        if next_alias < self.rules[probe.rule].attempt_count() {
            self.issue_probe(probe.rule, next_alias);
            return;
        }

        let rule = &self.rules[probe.rule];
        let failure = OrchestratorError::ProbeFailure(format!(
            "{} could not be applied, no name was recognised",
            rule.canonical_name()
        ));
        warn!("{}", failure);
        self.announce(&format!("{} {}", REPORT_PREFIX, failure));
        self.record(probe.rule, RuleOutcome::Exhausted);
        self.schedule_next_rule(probe);
    }

    fn schedule_next_rule(&mut self, probe: Probe) {
        self.probing.store(false, Ordering::Release);
        self.state = AutomatonState::Applying(Probe {
            timer: Timer::BetweenRules(Instant::now() + self.timings.inter_rule_delay),
            ..probe
        });
    }

    fn record(&mut self, rule: usize, outcome: RuleOutcome) {
        let spec = &self.rules[rule];
        self.reports.push(RuleReport {
            rule: spec.canonical_name().to_string(),
            value: spec.value().to_string(),
            outcome,
        });
    }

    fn finish(&mut self) {
        self.probing.store(false, Ordering::Release);
        self.state = AutomatonState::Finished;

        let applied = self
            .reports
            .iter()
            .filter(|r| matches!(r.outcome, RuleOutcome::Applied { .. }))
            .count();
        let summary = format!(
            "{} applied {}/{} rules",
            REPORT_PREFIX,
            applied,
            self.rules.len()
        );
        info!("{}", summary);
        self.announce(&summary);
    }

    fn announce(&self, line: &str) {
        self.console.on_line(StreamOrigin::Stdout, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::ChannelSink;

    const READY: &str = "[12:00:00] [Server thread/INFO]: Done (3.120s)! For help, type \"help\"";
    const UNKNOWN: &str = "[12:00:01] [Server thread/INFO]: Unknown or incomplete command, see below for error";
    const INVALID: &str = "[12:00:01] [Server thread/INFO]: Invalid boolean, expected 'true' or 'false' but found 'maybe'";

    struct RecordingCommands {
        tx: mpsc::UnboundedSender<String>,
    }

    impl CommandSink for RecordingCommands {
        fn send_command(&self, text: &str) {
            let _ = self.tx.send(text.to_string());
        }
    }

    struct Harness {
        automaton: Arc<PostBootAutomaton>,
        report: oneshot::Receiver<AutomatonReport>,
        commands: mpsc::UnboundedReceiver<String>,
        console: mpsc::UnboundedReceiver<(StreamOrigin, String)>,
    }

    impl Harness {
        fn new(rules: Vec<RuleSpec>) -> Self {
            let (tx, commands) = mpsc::unbounded_channel();
            let (sink, console) = ChannelSink::channel();
            let (automaton, report) = PostBootAutomaton::spawn(
                rules,
                ProbePatterns::minecraft().unwrap(),
                ProbeTimings::default(),
                Arc::new(RecordingCommands { tx }),
                Arc::new(sink),
            );
            Self {
                automaton,
                report,
                commands,
                console,
            }
        }

        fn feed(&self, line: &str) {
            self.automaton.on_line(StreamOrigin::Stdout, line);
        }

        fn console_lines(&mut self) -> Vec<String> {
            let mut lines = Vec::new();
            while let Ok((_, line)) = self.console.try_recv() {
                lines.push(line);
            }
            lines
        }
    }

    fn rule(name: &str, value: &str, aliases: &[&str]) -> RuleSpec {
        RuleSpec::new(name, value, aliases.iter().map(|a| a.to_string()).collect()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_name_retries_alias_then_succeeds_on_silence() {
        let mut h = Harness::new(vec![rule("keepInventory", "true", &["keep_inventory"])]);

        h.feed("[12:00:00] [Server thread/INFO]: Preparing level \"World_1.20.1\"");
        h.feed(READY);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule keepInventory true");
        assert_eq!(h.automaton.phase(), AutomatonPhase::Applying);

        h.feed(UNKNOWN);
        h.feed("...gamerule keepInventory true<--[HERE]");
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule keep_inventory true");

        let report = (&mut h.report).await.unwrap();
        assert!(report.completed);
        assert_eq!(
            report.rules,
            vec![RuleReport {
                rule: "keepInventory".into(),
                value: "true".into(),
                outcome: RuleOutcome::Applied {
                    via: "keep_inventory".into()
                },
            }]
        );
        assert_eq!(h.automaton.phase(), AutomatonPhase::Finished);

        let console = h.console_lines();
        assert!(console.iter().any(|l| l == READY));
        assert!(console.iter().any(|l| l == UNKNOWN));
        assert!(!console.iter().any(|l| l.contains("<--[HERE]")));
        assert_eq!(console.last().unwrap(), "[rules] applied 1/1 rules");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_probe_succeeds_once_and_advances_after_delay() {
        let mut h = Harness::new(vec![
            rule("doFireTick", "false", &[]),
            rule("mobGriefing", "false", &[]),
        ]);

        h.feed(READY);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule doFireTick false");
        let first = Instant::now();

        assert_eq!(h.commands.recv().await.unwrap(), "gamerule mobGriefing false");
        let gap = Instant::now() - first;
        let timings = ProbeTimings::default();
        let expected = timings.probe_timeout + timings.inter_rule_delay;
        assert!(gap >= expected && gap < expected + Duration::from_millis(5));

        let report = (&mut h.report).await.unwrap();
        assert_eq!(report.applied(), 2);
        assert_eq!(
            report
                .rules
                .iter()
                .filter(|r| r.rule == "doFireTick")
                .count(),
            1
        );
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_value_abandons_rule_without_trying_aliases() {
        let mut h = Harness::new(vec![
            rule("keepInventory", "maybe", &["keep_inventory"]),
            rule("doDaylightCycle", "false", &[]),
        ]);

        h.feed(READY);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule keepInventory maybe");
        h.feed(INVALID);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule doDaylightCycle false");

        let report = (&mut h.report).await.unwrap();
        assert_eq!(
            report.rules[0].outcome,
            RuleOutcome::InvalidValue {
                via: "keepInventory".into()
            }
        );
        assert_eq!(
            report.rules[1].outcome,
            RuleOutcome::Applied {
                via: "doDaylightCycle".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn echoes_between_rules_reach_the_console() {
        let mut h = Harness::new(vec![
            rule("keepInventory", "maybe", &[]),
            rule("doDaylightCycle", "false", &[]),
        ]);

        h.feed(READY);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule keepInventory maybe");
        h.feed(INVALID);
        while let Some((_, line)) = h.console.recv().await {
            if line.starts_with(REPORT_PREFIX) {
                break;
            }
        }

        // Outcome settled, next rule not yet probed: operator errors stay visible.
        h.feed("...say hello wrld<--[HERE]");
        assert_eq!(
            h.console.recv().await.unwrap().1,
            "...say hello wrld<--[HERE]"
        );

        assert_eq!(h.commands.recv().await.unwrap(), "gamerule doDaylightCycle false");
        h.feed("...le doDaylightCycle false<--[HERE]");
        let report = (&mut h.report).await.unwrap();
        assert!(report.completed);
        assert!(!h
            .console_lines()
            .iter()
            .any(|l| l.contains("doDaylightCycle false<--[HERE]")));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_aliases_are_reported_on_the_console() {
        let mut h = Harness::new(vec![rule("fooBar", "true", &["foo_bar"])]);

        h.feed(READY);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule fooBar true");
        h.feed(UNKNOWN);
        assert_eq!(h.commands.recv().await.unwrap(), "gamerule foo_bar true");
        h.feed(UNKNOWN);

        let report = (&mut h.report).await.unwrap();
        assert_eq!(report.rules[0].outcome, RuleOutcome::Exhausted);
        assert_eq!(report.applied(), 0);

        let console = h.console_lines();
        assert!(console
            .iter()
            .any(|l| l.starts_with(REPORT_PREFIX) && l.contains("fooBar could not be applied")));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_happens_before_ready() {
        let mut h = Harness::new(vec![rule("pvp", "false", &[])]);

        h.feed(UNKNOWN);
        h.feed(INVALID);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(h.commands.try_recv().is_err());
        assert_eq!(h.automaton.phase(), AutomatonPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_rule_list_finishes_on_ready() {
        let mut h = Harness::new(Vec::new());

        h.feed(READY);
        let report = (&mut h.report).await.unwrap();

        assert!(report.completed);
        assert!(report.rules.is_empty());
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_output_yields_partial_report() {
        let Harness {
            automaton,
            report,
            mut commands,
            ..
        } = Harness::new(vec![rule("pvp", "false", &[]), rule("doInsomnia", "false", &[])]);

        automaton.on_line(StreamOrigin::Stdout, READY);
        assert_eq!(commands.recv().await.unwrap(), "gamerule pvp false");
        drop(automaton);

        let report = report.await.unwrap();
        assert!(!report.completed);
        assert!(report.rules.is_empty());
    }
}

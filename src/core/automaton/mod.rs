pub mod engine;
pub mod patterns;
pub mod rules;

pub use engine::{
    AutomatonPhase, AutomatonReport, PostBootAutomaton, ProbeTimings, RuleOutcome, RuleReport,
    REPORT_PREFIX,
};
pub use patterns::{PatternConfig, ProbePatterns};
pub use rules::{parse_rules, JsonRuleFile, RuleSource, RuleSpec, StaticRules};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::error::OrchestratorResult;

/// Textual form of the patterns, as stored in settings.
///
/// `command_template` uses `{name}` and `{value}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub ready: String,
    pub unknown_identifier: String,
    pub invalid_value: String,
    pub probe_echo: String,
    pub command_template: String,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            ready: r"Done \([^)]*\)!".into(),
            unknown_identifier:
                r"(?i)(unknown or incomplete command|incorrect argument for command|unknown game ?rule)"
                    .into(),
            invalid_value:
                r"(?i)(invalid (boolean|integer|value)|expected (boolean|integer)|must not be (less|more) than)"
                    .into(),
            probe_echo: r"<--\[HERE\]".into(),
            command_template: "gamerule {name} {value}".into(),
        }
    }
}

/// Compiled line classifiers used by the post-boot automaton.
#[derive(Debug, Clone)]
pub struct ProbePatterns {
    ready: Regex,
    unknown_identifier: Regex,
    invalid_value: Regex,
    probe_echo: Regex,
    command_template: String,
}

impl ProbePatterns {
    pub fn compile(config: &PatternConfig) -> OrchestratorResult<Self> {
        Ok(Self {
            ready: Regex::new(&config.ready)?,
            unknown_identifier: Regex::new(&config.unknown_identifier)?,
            invalid_value: Regex::new(&config.invalid_value)?,
            probe_echo: Regex::new(&config.probe_echo)?,
            command_template: config.command_template.clone(),
        })
    }

    /// Phrasing used by vanilla-derived servers.
    pub fn minecraft() -> OrchestratorResult<Self> {
        Self::compile(&PatternConfig::default())
    }

    pub fn is_ready(&self, line: &str) -> bool {
        self.ready.is_match(line)
    }

    pub fn is_unknown_identifier(&self, line: &str) -> bool {
        self.unknown_identifier.is_match(line)
    }

    pub fn is_invalid_value(&self, line: &str) -> bool {
        self.invalid_value.is_match(line)
    }

    pub fn is_probe_echo(&self, line: &str) -> bool {
        self.probe_echo.is_match(line)
    }

    pub fn render_command(&self, name: &str, value: &str) -> String {
        self.command_template
            .replace("{name}", name)
            .replace("{value}", value)
    }
}

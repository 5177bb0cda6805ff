use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::automaton::{
    JsonRuleFile, PatternConfig, ProbePatterns, ProbeTimings, RuleSource, StaticRules,
};
use crate::core::error::{OrchestratorError, OrchestratorResult};
use crate::core::launch::{LaunchConfig, LaunchConfigProvider};

const APP_DIR_NAME: &str = "ServerOrchestrator";
const SETTINGS_FILE: &str = "orchestrator_settings.json";

/// Persisted orchestrator configuration.
///
/// Every field has a default, so partial files load fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Root of the `<type>/<type>-<version>[-<build>].jar` tree.
    pub binaries_dir: PathBuf,
    /// Working directory of the server process.
    pub runtime_dir: PathBuf,
    pub java_path: PathBuf,
    pub memory_mb: u32,
    pub port: u32,
    pub auto_accept_eula: bool,
    pub extra_args: Vec<String>,
    pub rules_file: Option<PathBuf>,
    pub probe_timeout_ms: u64,
    pub inter_rule_delay_ms: u64,
    pub probe_patterns: PatternConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        let timings = ProbeTimings::default();

        Self {
            binaries_dir: data_dir.join("binaries"),
            runtime_dir: data_dir.join("runtime"),
            java_path: PathBuf::from("java"),
            memory_mb: 2048,
            port: 25565,
            auto_accept_eula: false,
            extra_args: Vec::new(),
            rules_file: None,
            probe_timeout_ms: timings.probe_timeout.as_millis() as u64,
            inter_rule_delay_ms: timings.inter_rule_delay.as_millis() as u64,
            probe_patterns: PatternConfig::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn default_path() -> PathBuf {
        default_data_dir().join(SETTINGS_FILE)
    }

    /// Read settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("No settings at {:?} ({}), using defaults", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring corrupt settings file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> OrchestratorResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| OrchestratorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| OrchestratorError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn probe_timings(&self) -> ProbeTimings {
        ProbeTimings {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            inter_rule_delay: Duration::from_millis(self.inter_rule_delay_ms),
        }
    }

    pub fn probe_patterns(&self) -> OrchestratorResult<ProbePatterns> {
        ProbePatterns::compile(&self.probe_patterns)
    }

    /// The configured rule file, or an empty list when none is set.
    pub fn rule_source(&self) -> Box<dyn RuleSource> {
        match &self.rules_file {
            Some(path) => Box::new(JsonRuleFile::new(path.clone())),
            None => Box::new(StaticRules(Vec::new())),
        }
    }
}

impl LaunchConfigProvider for OrchestratorSettings {
    fn launch_config(&self) -> OrchestratorResult<LaunchConfig> {
        LaunchConfig::new(
            self.java_path.clone(),
            self.memory_mb,
            self.port,
            self.auto_accept_eula,
            self.extra_args.clone(),
        )
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let missing = OrchestratorSettings::load(&dir.path().join("absent.json"));
        assert_eq!(missing, OrchestratorSettings::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(
            OrchestratorSettings::load(&corrupt),
            OrchestratorSettings::default()
        );
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{ "port": 25570, "auto_accept_eula": true }"#).unwrap();

        let settings = OrchestratorSettings::load(&path);
        assert_eq!(settings.port, 25570);
        assert!(settings.auto_accept_eula);
        assert_eq!(settings.memory_mb, 2048);
        assert_eq!(settings.probe_timings(), ProbeTimings::default());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let settings = OrchestratorSettings {
            memory_mb: 4096,
            extra_args: vec!["-XX:+UseG1GC".into()],
            rules_file: Some(dir.path().join("rules.json")),
            ..OrchestratorSettings::default()
        };
        settings.save(&path).unwrap();

        assert_eq!(OrchestratorSettings::load(&path), settings);
    }

    #[test]
    fn provides_validated_launch_config() {
        let settings = OrchestratorSettings {
            java_path: PathBuf::from("/usr/bin/java"),
            memory_mb: 1024,
            ..OrchestratorSettings::default()
        };
        let config = settings.launch_config().unwrap();
        assert_eq!(config.memory_mb(), 1024);
        assert_eq!(config.port(), 25565);

        let bad_port = OrchestratorSettings {
            port: 70000,
            ..OrchestratorSettings::default()
        };
        assert!(matches!(
            bad_port.launch_config(),
            Err(OrchestratorError::InvalidLaunchConfig(_))
        ));
    }

    #[tokio::test]
    async fn no_rules_file_means_no_rules() {
        let rules = OrchestratorSettings::default()
            .rule_source()
            .load_rules()
            .await
            .unwrap();
        assert!(rules.is_empty());
    }
}

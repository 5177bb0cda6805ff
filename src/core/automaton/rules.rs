use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::{OrchestratorError, OrchestratorResult};

/// One declarative rule: a canonical name, the value to set and alternative
/// names tried in order when the server does not recognise the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSpec {
    canonical_name: String,
    value: String,
    aliases: Vec<String>,
}

impl RuleSpec {
    pub fn new(
        canonical_name: impl Into<String>,
        value: impl Into<String>,
        aliases: Vec<String>,
    ) -> OrchestratorResult<Self> {
        let canonical_name = canonical_name.into().trim().to_string();
        let value = value.into().trim().to_string();

        if canonical_name.is_empty() {
            return Err(OrchestratorError::RuleParse("rule without a name".into()));
        }
        if value.is_empty() {
            return Err(OrchestratorError::RuleParse(format!(
                "rule '{canonical_name}' has no value"
            )));
        }

        let mut unique: Vec<String> = Vec::with_capacity(aliases.len());
        for alias in aliases {
            let alias = alias.trim().to_string();
            if !alias.is_empty() && alias != canonical_name && !unique.contains(&alias) {
                unique.push(alias);
            }
        }

        Ok(Self {
            canonical_name,
            value,
            aliases: unique,
        })
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Number of probes available: the canonical name plus every alias.
    pub fn attempt_count(&self) -> usize {
        1 + self.aliases.len()
    }

    /// Name used for attempt `index` (0 is the canonical name).
    pub fn name_at(&self, index: usize) -> Option<&str> {
        match index {
            0 => Some(&self.canonical_name),
            n => self.aliases.get(n - 1).map(String::as_str),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    aliases: Vec<String>,
}

impl TryFrom<RawRule> for RuleSpec {
    type Error = OrchestratorError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let name = raw.name.unwrap_or_default();
        let value = match raw.value {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Bool(b)) => b.to_string(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };
        RuleSpec::new(name, value, raw.aliases)
    }
}

/// Parse a JSON array of `{ "name", "value", "aliases" }` objects.
///
/// The document itself must be a JSON array; individual malformed entries
/// are logged and skipped.
pub fn parse_rules(json: &str) -> OrchestratorResult<Vec<RuleSpec>> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(json)?;
    let mut rules = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawRule>(entry)
            .map_err(|e| OrchestratorError::RuleParse(e.to_string()))
            .and_then(RuleSpec::try_from);

        match parsed {
            Ok(rule) => rules.push(rule),
            Err(e) => warn!("Skipping rule #{}: {}", index, e),
        }
    }

    Ok(rules)
}

/// Supplies the ordered rule list applied after boot.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_rules(&self) -> OrchestratorResult<Vec<RuleSpec>>;
}

/// Rules stored as a JSON file on disk.
pub struct JsonRuleFile {
    path: PathBuf,
}

impl JsonRuleFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl RuleSource for JsonRuleFile {
    async fn load_rules(&self) -> OrchestratorResult<Vec<RuleSpec>> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| OrchestratorError::Io {
                path: self.path.clone(),
                source,
            })?;

        let rules = parse_rules(&json)?;
        info!("Loaded {} rules from {:?}", rules.len(), self.path);
        Ok(rules)
    }
}

/// Rules supplied directly in memory.
pub struct StaticRules(pub Vec<RuleSpec>);

#[async_trait]
impl RuleSource for StaticRules {
    async fn load_rules(&self) -> OrchestratorResult<Vec<RuleSpec>> {
        Ok(self.0.clone())
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Exit status reported when the process never started or its watcher failed.
pub const EXIT_STATUS_ABNORMAL: i32 = -1;

/// Central error type for the orchestration engine.
/// Every module returns `Result<T, OrchestratorError>`.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Patterns ────────────────────────────────────────
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    // ── Catalog ─────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Process ─────────────────────────────────────────
    #[error("A server is already running: {0}")]
    AlreadyRunning(String),

    #[error("Failed to spawn server process: {0}")]
    SpawnFailure(String),

    #[error("Server process ended abnormally: {0}")]
    AbnormalExit(String),

    #[error("Invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    // ── Rules ───────────────────────────────────────────
    #[error("Rule parse error: {0}")]
    RuleParse(String),

    #[error("Rule could not be applied: {0}")]
    ProbeFailure(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<std::io::Error> for OrchestratorError {
    fn from(source: std::io::Error) -> Self {
        OrchestratorError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// Front-ends forward errors as plain strings.
impl serde::Serialize for OrchestratorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

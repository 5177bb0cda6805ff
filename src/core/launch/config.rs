use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::error::{OrchestratorError, OrchestratorResult};

/// Validated launch parameters for one server start.
///
/// Immutable once built; `new` rejects an empty executable path, a zero
/// heap size and ports outside `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchConfig {
    executable_path: PathBuf,
    memory_mb: u32,
    port: u16,
    auto_accept_license: bool,
    extra_args: Vec<String>,
}

impl LaunchConfig {
    pub fn new(
        executable_path: impl Into<PathBuf>,
        memory_mb: u32,
        port: u32,
        auto_accept_license: bool,
        extra_args: Vec<String>,
    ) -> OrchestratorResult<Self> {
        let executable_path = executable_path.into();
        if executable_path.as_os_str().is_empty() {
            return Err(OrchestratorError::InvalidLaunchConfig(
                "executable path is required".into(),
            ));
        }

        if memory_mb == 0 {
            return Err(OrchestratorError::InvalidLaunchConfig(
                "memory allocation must be greater than 0 MB".into(),
            ));
        }

        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                OrchestratorError::InvalidLaunchConfig(format!(
                    "port {port} is outside 1-65535"
                ))
            })?;

        let extra_args = extra_args
            .into_iter()
            .map(|arg| arg.trim().to_string())
            .filter(|arg| !arg.is_empty())
            .collect();

        Ok(Self {
            executable_path,
            memory_mb,
            port,
            auto_accept_license,
            extra_args,
        })
    }

    pub fn executable_path(&self) -> &Path {
        &self.executable_path
    }

    pub fn memory_mb(&self) -> u32 {
        self.memory_mb
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auto_accept_license(&self) -> bool {
        self.auto_accept_license
    }

    pub fn extra_args(&self) -> &[String] {
        &self.extra_args
    }
}

/// Supplies a validated [`LaunchConfig`] before a server is started.
pub trait LaunchConfigProvider {
    fn launch_config(&self) -> OrchestratorResult<LaunchConfig>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_config_and_drops_blank_args() {
        let config = LaunchConfig::new(
            "/usr/bin/java",
            2048,
            25565,
            true,
            vec!["-XX:+UseG1GC".into(), "  ".into(), " -Dfoo=bar ".into()],
        )
        .unwrap();

        assert_eq!(config.port(), 25565);
        assert_eq!(config.memory_mb(), 2048);
        assert!(config.auto_accept_license());
        assert_eq!(config.extra_args(), ["-XX:+UseG1GC", "-Dfoo=bar"]);
    }

    #[test]
    fn rejects_missing_executable() {
        let err = LaunchConfig::new("", 1024, 25565, false, Vec::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidLaunchConfig(_)));
    }

    #[test]
    fn rejects_zero_memory() {
        let err = LaunchConfig::new("java", 0, 25565, false, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn rejects_out_of_range_ports() {
        assert!(LaunchConfig::new("java", 1024, 0, false, Vec::new()).is_err());
        assert!(LaunchConfig::new("java", 1024, 65536, false, Vec::new()).is_err());
        assert!(LaunchConfig::new("java", 1024, 1, false, Vec::new()).is_ok());
        assert!(LaunchConfig::new("java", 1024, 65535, false, Vec::new()).is_ok());
    }
}

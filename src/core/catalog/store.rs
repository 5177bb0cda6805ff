use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::BinaryEntry;
use super::version::compare_versions;
use crate::core::error::{OrchestratorError, OrchestratorResult};

/// Read-only view over a directory of server binaries.
///
/// Layout: `<root>/<type>/**/<type>-<version>[-<build>].jar`.
pub struct VersionCatalog {
    root: PathBuf,
}

impl VersionCatalog {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory names under the binary root, case-insensitive order.
    pub async fn list_types(&self) -> OrchestratorResult<Vec<String>> {
        let mut types = Vec::new();

        if !self.root.exists() {
            return Ok(types);
        }

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|source| OrchestratorError::Io {
                path: self.root.clone(),
                source,
            })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| OrchestratorError::Io {
                path: self.root.clone(),
                source,
            })?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                types.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        types.sort_by(|a, b| {
            a.to_ascii_lowercase()
                .cmp(&b.to_ascii_lowercase())
                .then_with(|| a.cmp(b))
        });
        Ok(types)
    }

    /// Every recognised binary of `server_type`, sorted by version, build
    /// and file name (ascending).
    pub async fn list_entries(&self, server_type: &str) -> OrchestratorResult<Vec<BinaryEntry>> {
        let Some(type_dir) = self.type_dir(server_type).await? else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        let mut pending = vec![type_dir];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot read {:?}: {}", dir, e);
                    continue;
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| OrchestratorError::Io {
                    path: dir.clone(),
                    source,
                })?
            {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };

                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let file_name = entry.file_name().to_string_lossy().to_string();
                    if let Some(parsed) = BinaryEntry::parse(server_type, &file_name, &path) {
                        found.push(parsed);
                    }
                }
            }
        }

        found.sort();
        debug!("Catalog: {} entries for type '{}'", found.len(), server_type);
        Ok(found)
    }

    /// Distinct versions of `server_type`, newest first.
    pub async fn list_versions(&self, server_type: &str) -> OrchestratorResult<Vec<String>> {
        let mut versions: Vec<String> = self
            .list_entries(server_type)
            .await?
            .into_iter()
            .map(|entry| entry.version)
            .collect();

        versions.sort_by(|a, b| descending_version(a, b));
        versions.dedup_by(|a, b| same_version(a, b));
        Ok(versions)
    }

    /// Distinct build numbers for one version, highest first.
    pub async fn list_builds(
        &self,
        server_type: &str,
        version: &str,
    ) -> OrchestratorResult<Vec<u32>> {
        let mut builds: Vec<u32> = self
            .list_entries(server_type)
            .await?
            .into_iter()
            .filter(|entry| same_version(&entry.version, version))
            .filter_map(|entry| entry.build)
            .collect();

        builds.sort_unstable_by(|a, b| b.cmp(a));
        builds.dedup();
        Ok(builds)
    }

    /// Resolve a concrete binary.
    ///
    /// With an explicit build the match must be exact. Without one, the
    /// build-less file wins, then the highest build on disk.
    pub async fn resolve(
        &self,
        server_type: &str,
        version: &str,
        build: Option<u32>,
    ) -> OrchestratorResult<BinaryEntry> {
        let candidates: Vec<BinaryEntry> = self
            .list_entries(server_type)
            .await?
            .into_iter()
            .filter(|entry| same_version(&entry.version, version))
            .collect();

        let resolved = match build {
            Some(wanted) => candidates.into_iter().find(|e| e.build == Some(wanted)),
            None => {
                let buildless = candidates.iter().find(|e| e.build.is_none()).cloned();
                buildless.or_else(|| candidates.into_iter().max_by_key(|e| e.build))
            }
        };

        resolved.ok_or_else(|| {
            OrchestratorError::NotFound(match build {
                Some(b) => format!("{server_type} {version} build {b}"),
                None => format!("{server_type} {version}"),
            })
        })
    }

    async fn type_dir(&self, server_type: &str) -> OrchestratorResult<Option<PathBuf>> {
        let exact = self.root.join(server_type);
        if tokio::fs::metadata(&exact).await.is_ok_and(|m| m.is_dir()) {
            return Ok(Some(exact));
        }

        Ok(self
            .list_types()
            .await?
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(server_type))
            .map(|name| self.root.join(name)))
    }
}

fn descending_version(a: &str, b: &str) -> Ordering {
    compare_versions(b, a).then_with(|| b.cmp(a))
}

/// `1.20` and `1.20.0` name the same version, as do `1.21.pre1` and `1.21.PRE1`.
fn same_version(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Equal
}

/// Copy `entry` to `destination`, replacing any previous file atomically.
///
/// The copy lands in a temp file next to the destination, is verified by
/// SHA-256 and then renamed into place, so readers never observe a partial
/// file. Returns the hex digest of the installed binary.
pub async fn materialize(entry: &BinaryEntry, destination: &Path) -> OrchestratorResult<String> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|source| OrchestratorError::Io {
            path: parent.clone(),
            source,
        })?;

    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "server.jar".into());
    let staging = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(source) = tokio::fs::copy(&entry.path, &staging).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(OrchestratorError::Io {
            path: entry.path.clone(),
            source,
        });
    }

    let digests = match sha256_file(&entry.path).await {
        Ok(expected) => sha256_file(&staging).await.map(|actual| (expected, actual)),
        Err(e) => Err(e),
    };
    let (expected, actual) = match digests {
        Ok(digests) => digests,
        Err(e) => {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }
    };
    if expected != actual {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(OrchestratorError::IntegrityMismatch {
            path: destination.to_path_buf(),
            expected,
            actual,
        });
    }

    if let Err(source) = tokio::fs::rename(&staging, destination).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(OrchestratorError::Io {
            path: destination.to_path_buf(),
            source,
        });
    }

    info!(
        "Materialized {} -> {:?} (sha256 {})",
        entry.file_name, destination, actual
    );
    Ok(actual)
}

async fn sha256_file(path: &Path) -> OrchestratorResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| OrchestratorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

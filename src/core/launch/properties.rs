// ─── Server Properties ───
// Per-version world isolation and license acceptance files in the runtime root.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::error::{OrchestratorError, OrchestratorResult};

pub const SERVER_PROPERTIES_FILE: &str = "server.properties";
pub const LEVEL_NAME_KEY: &str = "level-name";
pub const EULA_FILE: &str = "eula.txt";

/// World folder used for `version`, e.g. `World_1.20.1`.
pub fn world_name_for_version(version: &str) -> String {
    format!("World_{}", version.trim())
}

/// Set `key=value` in a `.properties` document.
///
/// The first assignment of `key` is replaced in place, later duplicates are
/// dropped, and the key is appended when absent. Comments, blank lines and
/// other keys are kept as-is.
pub fn set_property(contents: &str, key: &str, value: &str) -> String {
    let mut out = Vec::new();
    let mut replaced = false;

    for line in contents.lines() {
        if property_key(line) == Some(key) {
            if !replaced {
                out.push(format!("{key}={value}"));
                replaced = true;
            }
            continue;
        }
        out.push(line.to_string());
    }

    if !replaced {
        out.push(format!("{key}={value}"));
    }

    let mut rendered = out.join("\n");
    rendered.push('\n');
    rendered
}

fn property_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return None;
    }

    let end = trimmed.find(['=', ':']).unwrap_or(trimmed.len());
    Some(trimmed[..end].trim_end())
}

/// Rewrite `server.properties` in `runtime_root` so the server loads the
/// world folder belonging to `version`. Creates the file when missing.
pub async fn write_level_name(runtime_root: &Path, version: &str) -> OrchestratorResult<PathBuf> {
    let path = runtime_root.join(SERVER_PROPERTIES_FILE);
    let existing = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => return Err(OrchestratorError::Io { path, source }),
    };

    let world = world_name_for_version(version);
    let updated = set_property(&existing, LEVEL_NAME_KEY, &world);
    write_atomically(&path, &updated).await?;

    info!("{}={} written to {:?}", LEVEL_NAME_KEY, world, path);
    Ok(path)
}

/// Write `eula=true` into `eula.txt` in `runtime_root`.
pub async fn accept_eula(runtime_root: &Path) -> OrchestratorResult<()> {
    let path = runtime_root.join(EULA_FILE);
    let existing = tokio::fs::read_to_string(&path).await.unwrap_or_default();
    let updated = set_property(&existing, "eula", "true");
    write_atomically(&path, &updated).await?;

    debug!("License accepted in {:?}", path);
    Ok(())
}

async fn write_atomically(path: &Path, contents: &str) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| OrchestratorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let staging = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    if let Err(source) = tokio::fs::write(&staging, contents).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(OrchestratorError::Io {
            path: staging,
            source,
        });
    }

    if let Err(source) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(OrchestratorError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_level_name_and_keeps_the_rest() {
        let original = "#Minecraft server properties\nmotd=hello\nlevel-name=world\nserver-port=25565\n";
        let updated = set_property(original, LEVEL_NAME_KEY, "World_1.20.1");

        assert_eq!(
            updated,
            "#Minecraft server properties\nmotd=hello\nlevel-name=World_1.20.1\nserver-port=25565\n"
        );
    }

    #[test]
    fn appends_missing_key_and_collapses_duplicates() {
        assert_eq!(
            set_property("motd=hi", LEVEL_NAME_KEY, "World_1.21"),
            "motd=hi\nlevel-name=World_1.21\n"
        );
        assert_eq!(
            set_property("level-name=a\nlevel-name : b\n", LEVEL_NAME_KEY, "World_1.21"),
            "level-name=World_1.21\n"
        );
        assert_eq!(set_property("", "eula", "true"), "eula=true\n");
    }

    #[test]
    fn commented_keys_are_not_touched() {
        let updated = set_property("#level-name=old\n", LEVEL_NAME_KEY, "World_1.8.9");
        assert_eq!(updated, "#level-name=old\nlevel-name=World_1.8.9\n");
    }

    #[tokio::test]
    async fn writes_level_name_file_in_runtime_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_level_name(dir.path(), "1.20.1").await.unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.lines().any(|l| l == "level-name=World_1.20.1"));

        write_level_name(dir.path(), "1.21").await.unwrap();
        let contents =
            std::fs::read_to_string(dir.path().join(SERVER_PROPERTIES_FILE)).unwrap();
        assert_eq!(contents, "level-name=World_1.21\n");
    }

    #[tokio::test]
    async fn failed_rename_cleans_up_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join(EULA_FILE);
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("inside"), "x").unwrap();

        assert!(accept_eula(dir.path()).await.is_err());

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![EULA_FILE.to_string()]);
    }

    #[tokio::test]
    async fn accepts_eula() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EULA_FILE), "#By changing the setting below\neula=false\n")
            .unwrap();

        accept_eula(dir.path()).await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join(EULA_FILE)).unwrap();
        assert_eq!(contents, "#By changing the setting below\neula=true\n");
    }
}

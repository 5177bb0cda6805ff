use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::version::{compare_versions, is_version_token};

/// File extensions recognised as server distributables.
pub const BINARY_EXTENSIONS: &[&str] = &["jar"];

/// A discovered server binary, parsed from its file name.
///
/// Two shapes are recognised:
/// - `{type}-{version}-{build}.{ext}`
/// - `{type}-{version}.{ext}` (build-less)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryEntry {
    pub server_type: String,
    pub version: String,
    pub build: Option<u32>,
    pub file_name: String,
    pub path: PathBuf,
}

impl BinaryEntry {
    /// Parse `file_name` as a binary of `server_type`. Returns `None` for
    /// anything that does not match one of the recognised shapes.
    pub fn parse(server_type: &str, file_name: &str, path: &Path) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if !BINARY_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        {
            return None;
        }

        let prefix_len = server_type.len();
        let prefix = stem.get(..prefix_len)?;
        if !prefix.eq_ignore_ascii_case(server_type) {
            return None;
        }
        let rest = stem.get(prefix_len..)?.strip_prefix('-')?;

        let (version, build) = match rest.rsplit_once('-') {
            Some((version, build)) if is_build_number(build) => {
                (version, Some(build.parse::<u32>().ok()?))
            }
            Some(_) => return None,
            None => (rest, None),
        };

        if !is_version_token(version) {
            return None;
        }

        Some(Self {
            server_type: server_type.to_string(),
            version: version.to_string(),
            build,
            file_name: file_name.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Name shown in logs and exit callbacks, e.g. `paper 1.20.1 #450`.
    pub fn display_name(&self) -> String {
        match self.build {
            Some(build) => format!("{} {} #{}", self.server_type, self.version, build),
            None => format!("{} {}", self.server_type, self.version),
        }
    }
}

fn is_build_number(raw: &str) -> bool {
    !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit())
}

impl Ord for BinaryEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.version, &other.version)
            .then_with(|| self.build.cmp(&other.build))
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

impl PartialOrd for BinaryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

//! Read-only boot file set served over TFTP.
//!
//! Files are loaded once at startup and never change afterwards.
//! Requested names are reduced to their base name before lookup, so no
//! request can reach outside the set.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::BootFileError;

/// Read-only key to bytes lookup.
pub trait BootFileStore: Send + Sync {
    /// File contents by (already normalized) name.
    fn get(&self, name: &str) -> Option<Bytes>;

    /// Normalize `requested` and look it up.
    ///
    /// Returns the resolved name together with the contents.
    fn resolve(&self, requested: &str) -> Result<(String, Bytes), BootFileError> {
        let name = base_name(requested);
        match self.get(name) {
            Some(data) => Ok((name.to_string(), data)),
            None => Err(BootFileError::NotFound(name.to_string())),
        }
    }
}

/// Final path component of `path`, treating both `/` and `\` as
/// separators. Returns `"."` when nothing is left.
///
/// `"../../etc/passwd"` becomes `"passwd"`, `"/boot/"` becomes `"boot"`.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return ".";
    }

    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// In-memory boot file set.
#[derive(Debug, Clone, Default)]
pub struct BootFileSet {
    files: HashMap<String, Bytes>,
}

impl BootFileSet {
    /// Build a set from in-memory contents.
    pub fn from_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(name, data)| (name.into(), data.into()))
                .collect(),
        }
    }

    /// Load every regular file directly inside `dir`. Subdirectories are
    /// skipped, they could never be addressed after base-name reduction.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, BootFileError> {
        let dir = dir.as_ref();
        let load_err = |source| BootFileError::Load {
            path: dir.display().to_string(),
            source,
        };

        let mut files = HashMap::new();
        for entry in fs::read_dir(dir).map_err(load_err)? {
            let entry = entry.map_err(load_err)?;
            let file_type = entry.file_type().map_err(load_err)?;
            if !file_type.is_file() {
                debug!(path = %entry.path().display(), "Skipping non-file entry");
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };

            let data = fs::read(entry.path()).map_err(|source| BootFileError::Load {
                path: entry.path().display().to_string(),
                source,
            })?;
            files.insert(name, Bytes::from(data));
        }

        info!(dir = %dir.display(), count = files.len(), "Loaded boot files");
        Ok(Self { files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Names in the set, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.files.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl BootFileStore for BootFileSet {
    fn get(&self, name: &str) -> Option<Bytes> {
        self.files.get(name).cloned()
    }
}

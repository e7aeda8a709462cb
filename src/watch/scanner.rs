// src/watch/scanner.rs

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{AssayerError, Result};
use crate::fs::FileSystem;
use crate::types::{ArtifactRef, KnownSet};
use crate::watch::patterns::ArtifactFilter;

/// Lists the direct children of a directory and keeps those matching a
/// filter.
///
/// Stateless: every call returns the full current set.
#[derive(Debug, Clone)]
pub struct CheckpointScanner {
    fs: Arc<dyn FileSystem>,
}

impl CheckpointScanner {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Scan `directory` once.
    ///
    /// - Not recursive; subdirectories are entries like any other.
    /// - Names starting with `.` are skipped (shell `*` semantics).
    /// - An unreadable directory is `ScanFailed`, never an empty set.
    pub fn scan(&self, directory: &str, filter: &ArtifactFilter) -> Result<KnownSet> {
        let entries = self
            .fs
            .read_dir(Path::new(directory))
            .map_err(|e| AssayerError::ScanFailed {
                directory: directory.to_string(),
                reason: format!("{e:#}"),
            })?;

        let mut found = KnownSet::new();
        for path in entries {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path_str = path.to_string_lossy();
            if filter.matches(&path_str, &name) {
                found.insert(ArtifactRef::new(path_str.into_owned()));
            }
        }

        debug!(directory, artifacts = found.len(), "scanned directory");
        Ok(found)
    }
}

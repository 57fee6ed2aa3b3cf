//! Scoped handle for a serialized buffer on local storage

use eyre::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

enum StagedPath {
    /// Deleted when the handle is dropped
    Scoped(TempPath),
    /// Left on disk for inspection
    Retained(PathBuf),
}

/// A delimited-text file produced by the serializer
///
/// Unless retained, the file is removed as soon as the handle is dropped,
/// which happens right after a successful bulk copy or when a failed run
/// unwinds.
pub struct StagedFile {
    path: StagedPath,
    rows: usize,
}

impl StagedFile {
    pub(crate) fn scoped(path: TempPath, rows: usize) -> Self {
        Self {
            path: StagedPath::Scoped(path),
            rows,
        }
    }

    pub(crate) fn retained(path: PathBuf, rows: usize) -> Self {
        Self {
            path: StagedPath::Retained(path),
            rows,
        }
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            StagedPath::Scoped(p) => &**p,
            StagedPath::Retained(p) => p.as_path(),
        }
    }

    /// Number of data rows written (header excluded)
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_retained(&self) -> bool {
        matches!(self.path, StagedPath::Retained(_))
    }

    /// Stop managing the file and return its path
    pub fn keep(self) -> Result<PathBuf> {
        match self.path {
            StagedPath::Scoped(p) => p.keep().context("Failed to retain staged file"),
            StagedPath::Retained(p) => Ok(p),
        }
    }
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("path", &self.path())
            .field("rows", &self.rows)
            .field("retained", &self.is_retained())
            .finish()
    }
}

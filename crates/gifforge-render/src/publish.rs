//! Write-temp-then-rename publication of artifacts.
//!
//! Readers of the slot path only ever see a complete previous artifact or a
//! complete new one. Temporary files live beside the slot so the final
//! rename stays on one filesystem.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{RenderError, Result};

/// The well-known location of a session's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSlot {
    dir: PathBuf,
    name: String,
}

impl ArtifactSlot {
    /// Creates a slot for `name` inside `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// Final path of the artifact.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Directory holding the slot.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a fresh temporary file next to the slot.
    ///
    /// Returns the cleanup guard together with the open write handle.
    pub fn temp_file(&self, stage: &str) -> Result<(TempArtifact, File)> {
        fs::create_dir_all(&self.dir).map_err(|e| RenderError::artifact(&self.dir, e))?;
        let path = self
            .dir
            .join(format!(".{}.{stage}.{}.tmp", self.name, uuid::Uuid::new_v4().simple()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| RenderError::artifact(&path, e))?;
        Ok((
            TempArtifact {
                path,
                persisted: false,
            },
            file,
        ))
    }
}

/// A temporary file that is deleted unless it gets persisted.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    persisted: bool,
}

impl TempArtifact {
    /// Path of the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file on disk.
    pub fn size(&self) -> Result<u64> {
        fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|e| RenderError::artifact(&self.path, e))
    }

    /// Atomically moves the file onto the slot, replacing any prior artifact.
    pub fn persist(mut self, slot: &ArtifactSlot) -> Result<PathBuf> {
        let target = slot.path();
        fs::rename(&self.path, &target).map_err(|e| RenderError::artifact(&target, e))?;
        self.persisted = true;
        Ok(target)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temporary artifact");
            }
        }
    }
}

//! Downloaded files that delete themselves.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Delete a file if it exists.
///
/// Returns `true` when a file was actually removed. A missing file is a
/// no-op and any other failure is logged, never raised.
pub fn cleanup_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temporary file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            false
        }
    }
}

/// Exclusive owner of one temporary media file.
///
/// The file is deleted exactly once: by [`TempMedia::discard`], or on drop
/// if `discard` was never called. An optional scratch directory is removed
/// afterwards when it has become empty.
#[derive(Debug)]
pub struct TempMedia {
    path: PathBuf,
    scratch_dir: Option<PathBuf>,
    armed: bool,
}

impl TempMedia {
    /// Take ownership of `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scratch_dir: None,
            armed: true,
        }
    }

    /// Also remove `dir` once it is empty
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Location of the owned file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory the file lives in, if any
    #[must_use]
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Current size of the file on disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is missing or unreadable.
    pub async fn size(&self) -> std::io::Result<u64> {
        tokio::fs::metadata(&self.path).await.map(|m| m.len())
    }

    /// Delete the file now. Returns `true` if a file was removed.
    pub fn discard(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        let removed = cleanup_file(&self.path);
        if let Some(dir) = &self.scratch_dir {
            // Fails while other files remain, which is what we want
            let _ = std::fs::remove_dir(dir);
        }
        removed
    }
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        self.release();
    }
}

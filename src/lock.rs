//! Cross-process exclusive locks on shared repository directories.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{FetchError, Result};

/// Exclusive `flock` on a lock file, released on drop.
#[derive(Debug)]
pub struct RepoLock {
    file: Option<File>,
    path: PathBuf,
}

impl RepoLock {
    /// Block until the lock at `path` is held.
    ///
    /// Waiting is not an error and has no timeout. Only a lock file that
    /// cannot be created or locked at all fails.
    pub fn acquire(path: &Path) -> Result<Self> {
        let structural = |e: std::io::Error| FetchError::LockAcquisition {
            path: path.to_path_buf(),
            message: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(structural)?;
        }

        // Never unlink the lock file: a second process could then create a
        // fresh inode at the same path and lock it concurrently.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(structural)?;

        debug!(lock = %path.display(), "waiting for lock");
        file.lock_exclusive().map_err(structural)?;
        debug!(lock = %path.display(), "lock acquired");

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release now. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            // Closing the descriptor drops the flock even if unlock fails.
            let _ = FileExt::unlock(&file);
            debug!(lock = %self.path.display(), "lock released");
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) fn is_locked(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

//! Single-cycle lease.
//!
//! At most one cycle may run at a time. The lease is an advisory exclusive
//! lock on a file in the state directory, taken without blocking and held
//! until the lease is dropped. The holder writes its pid into the file for
//! operators.

use crate::error::{SyncError, SyncResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Exclusive right to run one sync cycle.
#[derive(Debug)]
pub struct CycleLease {
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _file: File,
}

impl CycleLease {
    /// Takes the lease or fails immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CycleInProgress`] if another process or handle
    /// holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(SyncError::CycleInProgress(path));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_data()?;

        tracing::debug!(path = %path.display(), "cycle lease acquired");
        Ok(Self { path, _file: file })
    }

    /// Returns the lease file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CycleLease {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "cycle lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("panelsync.lock");

        let lease = CycleLease::try_acquire(&path).unwrap();
        assert!(matches!(
            CycleLease::try_acquire(&path),
            Err(SyncError::CycleInProgress(p)) if p == path
        ));

        drop(lease);
        CycleLease::try_acquire(&path).unwrap();
    }

    #[test]
    fn holder_pid_is_written() {
        let dir = tempdir().unwrap();
        let lease = CycleLease::try_acquire(dir.path().join("run/panelsync.lock")).unwrap();
        let contents = fs::read_to_string(lease.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}

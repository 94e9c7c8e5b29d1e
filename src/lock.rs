//! Advisory exclusive process lock.
//!
//! Prevents two ingest/verify runs from mutating the same catalog
//! concurrently. A plain PID file plus an OS file lock (not just
//! existence checking) so a crashed run's stale lock doesn't wedge the
//! next one indefinitely on POSIX systems.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct ProcessLock {
    path: PathBuf,
    file: File,
}

impl ProcessLock {
    /// Acquire the lock at `dir/.gpod-cp.pid`, failing with
    /// `Error::LockContention` if another process already holds it.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(".gpod-cp.pid");

        if path.exists() {
            let existing_pid = std::fs::read_to_string(&path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            return Err(Error::LockContention(existing_pid));
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::config(format!("cannot create lock file {}: {e}", path.display())))?;

        lock_exclusive(&file)?;

        write!(file, "{}", std::process::id())
            .map_err(|e| Error::config(format!("cannot write lock file: {e}")))?;

        Ok(Self { path, file })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        return Err(Error::config("failed to acquire file lock"));
    }
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> Result<()> {
    Ok(())
}

/// Dedicated process exit code used when lock acquisition fails, so
/// calling scripts can distinguish "already running" from other
/// failures.
pub const EXIT_LOCK_CONTENTION: i32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = ProcessLock::acquire(dir.path()).unwrap();
            assert!(dir.path().join(".gpod-cp.pid").exists());
        }
        assert!(!dir.path().join(".gpod-cp.pid").exists());
        let _lock2 = ProcessLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn second_acquire_is_contention() {
        let dir = tempfile::tempdir().unwrap();
        let _lock = ProcessLock::acquire(dir.path()).unwrap();
        let err = ProcessLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, Error::LockContention(_)));
    }
}

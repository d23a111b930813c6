//! Advisory file locks for cross-process mutual exclusion.

use hangar_common_core::{Error, ErrorCode, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// An exclusive advisory lock held on a lock file until dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock, waiting up to `timeout` for other holders.
    ///
    /// The lock file is created if it does not exist. Waiting blocks the
    /// calling thread.
    pub fn exclusive(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            crate::ensure_dir(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                Error::io(
                    ErrorCode::FILE_WRITE_ERROR,
                    format!("failed to open lock file: {}", path.display()),
                    path,
                    e,
                )
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            if try_lock(&file)? {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }
            if Instant::now() >= deadline {
                return Err(Error::FileSystem {
                    code: ErrorCode::FILE_LOCKED,
                    message: format!(
                        "timed out after {:?} waiting for lock: {}",
                        timeout,
                        path.display()
                    ),
                    path: Some(path.to_string_lossy().to_string()),
                    source: None,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err.into())
    }
}

// Windows grants exclusive access through the open handle itself.
#[cfg(not(unix))]
fn try_lock(_file: &File) -> Result<bool> {
    Ok(true)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/registry.lock");
        let lock = FileLock::exclusive(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());
    }

    #[test]
    #[cfg(unix)]
    fn test_second_lock_times_out_until_released() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.lock");

        let first = FileLock::exclusive(&path, Duration::from_millis(100)).unwrap();
        let err = FileLock::exclusive(&path, Duration::from_millis(60)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FILE_LOCKED);

        drop(first);
        assert!(FileLock::exclusive(&path, Duration::from_millis(100)).is_ok());
    }
}

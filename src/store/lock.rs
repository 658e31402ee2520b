//! Lock-file based mutual exclusion for [`FileStore`](crate::store::FileStore)

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Delay between attempts while another process holds the lock
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Metadata written into the lock file to identify the holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started: String,
}

/// Lock guard that releases the lock file when dropped
///
/// The process that manages to create the lock file (`create_new`) holds the
/// lock. Others poll until `timeout` and then give up with
/// [`StoreError::LockTimeout`]. A lock left behind by a crashed process is
/// never removed automatically; the timeout message names the file so an
/// operator can remove it.
#[derive(Debug)]
pub struct FileLockGuard {
    path: PathBuf,
}

impl FileLockGuard {
    /// Acquire the lock at `path`, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::LockTimeout` if the lock cannot be acquired in time,
    /// or `StoreError::Io` for any other filesystem failure.
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let start = Instant::now();

        let info = LockInfo {
            pid: std::process::id(),
            started: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string(&info)?;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(json.as_bytes()) {
                        let _ = fs::remove_file(&path);
                        return Err(StoreError::Io(e));
                    }
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        let holder = read_lock_info(&path)
                            .map(|i| format!("held by pid {} since {}", i.pid, i.started))
                            .unwrap_or_else(|| "holder unknown".to_string());
                        return Err(StoreError::LockTimeout(format!(
                            "could not lock {} within {:.1}s ({}). \
                             If no other migration is running, delete the lock file.",
                            path.display(),
                            timeout.as_secs_f64(),
                            holder
                        )));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // Ignore errors during drop - we can't propagate them
        let _ = fs::remove_file(&self.path);
    }
}

/// Read the holder info of an existing lock file
pub fn read_lock_info(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.lock");
        {
            let guard = FileLockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
            assert!(guard.path().exists());
            let info = read_lock_info(&path).unwrap();
            assert_eq!(info.pid, std::process::id());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.lock");
        let _held = FileLockGuard::acquire(&path, Duration::from_secs(1)).unwrap();

        let err = FileLockGuard::acquire(&path, Duration::from_millis(60)).unwrap_err();
        match err {
            StoreError::LockTimeout(msg) => assert!(msg.contains("held by pid")),
            other => panic!("Expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn test_acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.lock");
        let held = FileLockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let guard = FileLockGuard::acquire(&path, Duration::from_secs(5)).unwrap();
        release.join().unwrap();
        assert_eq!(read_lock_info(guard.path()).unwrap().pid, std::process::id());
    }

    #[test]
    fn test_failed_acquire_leaves_no_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("store.lock");

        let err = FileLockGuard::acquire(&path, Duration::from_millis(60)).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!path.exists());
    }
}

//! Per-protocol advisory locks shared by lifecycle commands and the health supervisor.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ManagerError, Result};
use crate::protocol::ProtocolKind;

const POLL: Duration = Duration::from_millis(100);

/// Exclusive `flock` on `<lock_dir>/<kind>.lock`, released on drop.
#[derive(Debug)]
pub struct ProtocolLock {
    kind: ProtocolKind,
    path: PathBuf,
    file: File,
}

impl ProtocolLock {
    fn open(lock_dir: &Path, kind: ProtocolKind) -> Result<(PathBuf, File)> {
        fs::create_dir_all(lock_dir)?;
        let path = lock_dir.join(format!("{}.lock", kind.name()));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok((path, file))
    }

    /// Takes the lock without waiting. `Ok(None)` when another holder has it.
    pub fn try_acquire(lock_dir: &Path, kind: ProtocolKind) -> Result<Option<Self>> {
        let (path, file) = Self::open(lock_dir, kind)?;
        if try_flock(&file)? {
            trace!(%kind, path = %path.display(), "Lock acquired");
            Ok(Some(Self { kind, path, file }))
        } else {
            Ok(None)
        }
    }

    /// Waits up to `timeout` for the lock, then fails with `Locked`.
    pub async fn acquire(lock_dir: &Path, kind: ProtocolKind, timeout: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(lock) = Self::try_acquire(lock_dir, kind)? {
                return Ok(lock);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ManagerError::Locked { kind });
            }
            debug!(%kind, "Waiting for lifecycle lock");
            tokio::time::sleep(POLL).await;
        }
    }

    /// Locks several kinds in a fixed order so two callers cannot deadlock.
    pub async fn acquire_all(
        lock_dir: &Path,
        kinds: &[ProtocolKind],
        timeout: Duration,
    ) -> Result<Vec<Self>> {
        let mut sorted = kinds.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut held = Vec::with_capacity(sorted.len());
        for kind in sorted {
            held.push(Self::acquire(lock_dir, kind, timeout).await?);
        }
        Ok(held)
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProtocolLock {
    fn drop(&mut self) {
        unlock(&self.file);
        trace!(kind = %self.kind, "Lock released");
    }
}

#[cfg(unix)]
fn try_flock(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err.into())
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn try_flock(_file: &File) -> Result<bool> {
    Err(ManagerError::UnsupportedPlatform(
        "advisory locks require a Unix host".into(),
    ))
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = ProtocolLock::try_acquire(dir.path(), ProtocolKind::Reality)
            .unwrap()
            .unwrap();
        assert!(ProtocolLock::try_acquire(dir.path(), ProtocolKind::Reality)
            .unwrap()
            .is_none());
        assert!(ProtocolLock::try_acquire(dir.path(), ProtocolKind::Snell)
            .unwrap()
            .is_some());

        drop(first);
        assert!(ProtocolLock::try_acquire(dir.path(), ProtocolKind::Reality)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_with_locked() {
        let dir = tempfile::tempdir().unwrap();
        let _held = ProtocolLock::try_acquire(dir.path(), ProtocolKind::AnyTls)
            .unwrap()
            .unwrap();
        let err = ProtocolLock::acquire(dir.path(), ProtocolKind::AnyTls, Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Locked { kind: ProtocolKind::AnyTls }));
    }

    #[tokio::test]
    async fn acquire_all_sorts_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let locks = ProtocolLock::acquire_all(
            dir.path(),
            &[ProtocolKind::AnyTls, ProtocolKind::Reality, ProtocolKind::AnyTls],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let kinds: Vec<_> = locks.iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec![ProtocolKind::Reality, ProtocolKind::AnyTls]);
    }
}

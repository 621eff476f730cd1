//! Per-cluster advisory lock.
//!
//! One lock file per fsid under the lock directory guards every mutating
//! operation (deploy, reconfig, remove). The OS-level flock is paired
//! with an in-process reentrancy counter: the flock is held iff the
//! counter is above zero. Lock files are never deleted, only unlocked,
//! to avoid races with concurrent creators.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::fsutil;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct ClusterLock {
    lock_file: PathBuf,
    /// Open and flocked iff we currently hold the OS lock.
    fd: Option<File>,
    counter: u32,
}

/// Scope guard returned by [`ClusterLock::hold`]; releases on drop.
pub struct LockGuard<'a> {
    lock: &'a mut ClusterLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(false);
    }
}

impl ClusterLock {
    pub fn new(ctx: &Ctx, fsid: &str) -> Result<Self> {
        fsutil::makedirs(&ctx.lock_dir, 0o700, None)?;
        Ok(Self {
            lock_file: ctx.lock_dir.join(format!("{fsid}.lock")),
            fd: None,
            counter: 0,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.fd.is_some()
    }

    /// Acquire and return a guard that releases when it leaves scope.
    pub async fn hold(&mut self, timeout: Option<Duration>) -> Result<LockGuard<'_>> {
        self.acquire(timeout).await?;
        Ok(LockGuard { lock: self })
    }

    /// Acquire the lock, polling every 50 ms.
    ///
    /// With `timeout = None` this blocks until the lock is obtained. A
    /// bounded wait that expires rolls back the counter increment and
    /// fails with [`Error::LockTimeout`].
    pub async fn acquire(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.counter += 1;

        let start = Instant::now();
        loop {
            if !self.is_locked() {
                debug!(lock = %self.lock_file.display(), "Acquiring cluster lock");
                self.try_flock()?;
            }
            if self.is_locked() {
                debug!(lock = %self.lock_file.display(), "Cluster lock acquired");
                return Ok(());
            }
            if let Some(bound) = timeout {
                if start.elapsed() >= bound {
                    warn!(lock = %self.lock_file.display(), "Timeout acquiring cluster lock");
                    self.counter = self.counter.saturating_sub(1);
                    return Err(Error::LockTimeout(self.lock_file.clone()));
                }
            }
            debug!(
                lock = %self.lock_file.display(),
                "Cluster lock busy, waiting {:?}", POLL_INTERVAL
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Release the lock. The OS lock is only dropped once the counter
    /// reaches zero, or unconditionally when `force` is set. Releasing an
    /// unheld lock is a no-op.
    pub fn release(&mut self, force: bool) {
        if !self.is_locked() {
            return;
        }
        self.counter = self.counter.saturating_sub(1);
        if self.counter == 0 || force {
            debug!(lock = %self.lock_file.display(), "Releasing cluster lock");
            if let Some(fd) = self.fd.take() {
                // do not remove the lock file: a concurrent creator may
                // already have opened it
                unsafe {
                    libc::flock(fd.as_raw_fd(), libc::LOCK_UN);
                }
            }
            self.counter = 0;
        }
    }

    fn try_flock(&mut self) -> Result<()> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&self.lock_file)?;
        let ret = unsafe { libc::flock(fd.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            self.fd = Some(fd);
        }
        // EWOULDBLOCK: someone else holds it; drop the fd and retry later
        Ok(())
    }
}

impl Drop for ClusterLock {
    /// Last-resort leak guard; normal release goes through [`LockGuard`].
    fn drop(&mut self) {
        self.release(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx(dir: &std::path::Path) -> Ctx {
        let mut ctx = Ctx::with_runtime(PathBuf::from("/usr/bin/podman"));
        ctx.lock_dir = dir.to_path_buf();
        ctx
    }

    const FSID: &str = "11111111-1111-1111-1111-111111111111";

    #[tokio::test]
    async fn test_acquire_release() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut lock = ClusterLock::new(&ctx, FSID).unwrap();

        lock.acquire(None).await.unwrap();
        assert!(lock.is_locked());
        lock.release(false);
        assert!(!lock.is_locked());
        // lock file survives release
        assert!(dir.path().join(format!("{FSID}.lock")).exists());
    }

    #[tokio::test]
    async fn test_reentrant_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut lock = ClusterLock::new(&ctx, FSID).unwrap();

        lock.acquire(None).await.unwrap();
        lock.acquire(None).await.unwrap();
        lock.release(false);
        assert!(lock.is_locked(), "still held after one of two releases");
        lock.release(false);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut holder = ClusterLock::new(&ctx, FSID).unwrap();
        holder.acquire(None).await.unwrap();

        let mut waiter = ClusterLock::new(&ctx, FSID).unwrap();
        let err = waiter
            .acquire(Some(Duration::from_secs(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
        assert!(!waiter.is_locked());

        holder.release(false);
        waiter.acquire(Some(Duration::from_secs(5))).await.unwrap();
        assert!(waiter.is_locked());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut lock = ClusterLock::new(&ctx, FSID).unwrap();
        lock.release(false);
        lock.acquire(None).await.unwrap();
        lock.release(false);
        lock.release(false);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let mut lock = ClusterLock::new(&ctx, FSID).unwrap();
        {
            let _guard = lock.hold(None).await.unwrap();
        }
        assert!(!lock.is_locked());
    }
}

//! Inter-process advisory lock around every LVM invocation.
//!
//! LVM2's command-line tools are not reentrant from a single process, let
//! alone across processes sharing on-disk metadata. A `flock(2)` on a
//! well-known path is the single chokepoint that keeps concurrent plugin
//! instances (or a plugin instance racing a human operator's `lvs`) from
//! corrupting VG metadata.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};

pub struct LvmLock {
    path: PathBuf,
}

impl LvmLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquire the lock, run `f`, and release it on every exit path
    /// (including `f` returning an error or the guard being dropped during
    /// an unwind).
    pub fn with_lock<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<std::io::Error>,
    {
        let guard = LockGuard::acquire(&self.path)?;
        let result = f();
        drop(guard);
        result
    }
}

struct LockGuard {
    file: File,
}

impl LockGuard {
    fn acquire(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        flock(file.as_raw_fd(), FlockArg::LockExclusive)
            .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;

        Ok(Self { file })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }
}

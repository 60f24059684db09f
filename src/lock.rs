//! Single-daemon lock.
//!
//! The observable contract is one `myqsd.pid` file per host containing the
//! live daemon's PID on a single line. Exclusivity itself comes from an OS
//! advisory lock on that file rather than from re-reading the PID after a
//! delay: losing an flock race is immediate and unambiguous, while the PID
//! content remains readable by anyone (the status reporter, an operator's
//! shell) exactly as before.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::{MyqsError, Result};
use crate::process::pid_alive;

#[derive(Debug, Clone)]
pub struct DaemonLock {
    path: PathBuf,
}

/// Holds the flock for the lifetime of the daemon; dropping the guard
/// unlocks and removes the PID file.
pub struct LockGuard {
    file: Option<Flock<File>>,
    path: PathBuf,
}

impl DaemonLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the lock file, if the file exists and parses.
    pub fn read_pid(&self) -> Option<i32> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        text.trim().parse().ok()
    }

    /// Whether a scheduler daemon is currently alive on this host. Tolerant
    /// of a missing, unreadable, or garbled lock file: all of those mean "no
    /// daemon" rather than an error.
    pub fn check(&self) -> bool {
        self.read_pid().map(pid_alive).unwrap_or(false)
    }

    /// Take the lock for the calling process and record its PID. Fails with
    /// [`MyqsError::LockHeld`] when another live daemon holds the flock.
    pub fn acquire(&self) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_file, _errno)) => return Err(MyqsError::LockHeld),
        };
        locked.set_len(0)?;
        locked.write_all(format!("{}\n", std::process::id()).as_bytes())?;
        locked.flush()?;
        tracing::info!(pid = std::process::id(), path = %self.path.display(), "Daemon lock acquired");
        Ok(LockGuard {
            file: Some(locked),
            path: self.path.clone(),
        })
    }

    /// Stop a previously detected daemon: SIGTERM to the recorded PID, then
    /// delete the lock file. A failed deletion is fatal: a stale lock file
    /// would shadow the next daemon.
    pub fn stop_holder(&self) -> Result<()> {
        if let Some(pid) = self.read_pid() {
            if pid_alive(pid) {
                tracing::info!(pid, "Stopping running scheduler daemon");
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl LockGuard {
    /// Whether the lock path still names the file this guard holds. During a
    /// restart the old daemon's file can be unlinked and replaced by a newer
    /// daemon's before the old guard drops; the path then belongs to the
    /// successor and must not be touched.
    fn owns_path(&self) -> bool {
        use std::os::unix::fs::MetadataExt;
        let Some(file) = self.file.as_ref() else {
            return false;
        };
        let (Ok(held), Ok(on_disk)) = (file.metadata(), std::fs::metadata(&self.path)) else {
            return false;
        };
        held.dev() == on_disk.dev() && held.ino() == on_disk.ino()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlink before releasing the flock so a waiting competitor never
        // reads our stale PID.
        if self.owns_path() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %e, path = %self.path.display(), "Failed to remove lock file");
                }
            }
        }
        drop(self.file.take());
    }
}

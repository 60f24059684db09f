use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MyqsError, Result};

/// Location of the per-host spool directory holding job records, the
/// daemon lock file, and the daemon log.
///
/// Every component (daemon, status reporter, tests) works against the same
/// spool; job records are plain files, so the spool is also the recovery
/// log after a crash.
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Spool root, conventionally `~/.config/myqs/<hostname>/`.
    pub root: PathBuf,
}

impl SpoolConfig {
    /// Spool for this host under the user's config directory.
    pub fn for_current_host() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| MyqsError::Config("cannot determine the config directory".into()))?;
        let host = hostname::get()
            .map_err(MyqsError::Io)?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            root: base.join("myqs").join(host),
        })
    }

    /// Spool rooted at an explicit directory (tests, non-standard layouts).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the spool directory. Failure here is fatal for the daemon.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            MyqsError::Config(format!(
                "cannot create spool directory {}: {}",
                self.root.display(),
                e
            ))
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("myqsd.pid")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.root.join("myqsd.log")
    }
}

/// Tunables of the scheduling loop.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// CPU slot budget for admission.
    pub slots: u32,
    /// Upper bound on the wait between scheduling passes.
    pub pass_interval: Duration,
    /// How often terminal records are purged.
    pub purge_interval: Duration,
    /// Age beyond which terminal records are deleted.
    pub retention: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            slots: num_cpus::get() as u32,
            pass_interval: Duration::from_secs(2),
            purge_interval: Duration::from_secs(300),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl DaemonConfig {
    /// Build a config with the given slot budget, validating it against the
    /// machine's core count. An out-of-range budget is a fatal argument error.
    pub fn with_slots(slots: u32) -> Result<Self> {
        let cores = num_cpus::get() as u32;
        if slots > cores {
            return Err(MyqsError::Config(format!(
                "slot count {} exceeds the {} cores of this host",
                slots, cores
            )));
        }
        Ok(Self {
            slots,
            ..Self::default()
        })
    }
}

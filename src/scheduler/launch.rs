use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::{MyqsError, Result};
use crate::spool::JobRecord;

/// Seam between admission and process creation, so scheduling policy can be
/// tested without forking real executors.
pub trait Launcher: Send + Sync {
    /// Start the executor for an admitted job, detached in its own process
    /// group, with combined output going to `logfile`. Returns the PGID.
    fn launch(&self, record: &JobRecord, logfile: &Path) -> Result<i32>;
}

/// Production launcher: re-execs this binary as `myqsd --run-job <jobid>`.
///
/// The child is put in a fresh process group whose PGID equals its PID; the
/// user command it forks inherits that group, which is what makes group
/// liveness an accurate "is this job still running" probe.
pub struct ExecLauncher {
    exe: PathBuf,
}

impl ExecLauncher {
    pub fn from_current_exe() -> Result<Self> {
        Ok(Self {
            exe: std::env::current_exe()?,
        })
    }

    pub fn with_exe(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }
}

impl Launcher for ExecLauncher {
    fn launch(&self, record: &JobRecord, logfile: &Path) -> Result<i32> {
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)?;

        let mut cmd = tokio::process::Command::new(&self.exe);
        cmd.arg("--run-job")
            .arg(record.jobid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| MyqsError::Spawn(format!("job {}: {}", record.jobid, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| MyqsError::Spawn(format!("job {}: executor exited at spawn", record.jobid)))?;

        // Fire and forget: the job is tracked through its record and its
        // process group, never awaited. This task only reaps the executor.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(pid as i32)
    }
}

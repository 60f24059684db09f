//! Per-job executor process.
//!
//! The daemon re-execs itself once per admitted job; this module is that
//! child's entry point. It runs the user command under `sh -c` in the job's
//! working directory, waits for it, and records the outcome in the job's
//! record. Stdout and stderr already point at the job's log file, set up by
//! the launcher before the exec.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;

use crate::error::{MyqsError, Result};
use crate::spool::{JobState, JobStore};

const FINISH_RETRIES: u32 = 10;
const FINISH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Run one admitted job to completion and persist its terminal state.
pub async fn run_job(store: &JobStore, jobid: u32) -> Result<()> {
    let record = store.load(jobid)?.ok_or(MyqsError::JobNotFound(jobid))?;
    let command = record
        .command()
        .ok_or_else(|| MyqsError::Spawn(format!("job {} has no command", jobid)))?
        .to_string();

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(&command).stdin(Stdio::null());
    if let Some(dir) = record.directory() {
        if Path::new(dir).is_dir() {
            cmd.current_dir(dir);
        }
    }

    let status = cmd.status().await;
    let finish = Utc::now().timestamp();

    // Journal the finish time right away; the terminal transition below may
    // retry for a while, and the record should carry the real completion
    // time even if this process dies before the transition lands.
    if let Err(e) = store.append(jobid, "FINISH", &finish.to_string()) {
        tracing::warn!(jobid, error = %e, "Could not journal finish time");
    }

    let outcome = match &status {
        Ok(st) if st.success() => JobState::Done,
        Ok(st) => {
            tracing::info!(jobid, code = st.code(), "Job command failed");
            JobState::Failed
        }
        Err(e) => {
            tracing::error!(jobid, error = %e, "Could not run job command");
            JobState::Failed
        }
    };

    finish_transition(store, jobid, outcome, finish).await
}

/// Persist the terminal state. The admitting daemon writes the running
/// record just after spawning us, so a very short command can finish before
/// that write lands; retry briefly instead of failing the race.
async fn finish_transition(
    store: &JobStore,
    jobid: u32,
    outcome: JobState,
    finish: i64,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match store.transition(jobid, JobState::Running, outcome, |r| {
            r.set("FINISH", finish.to_string());
        }) {
            Ok(_) => {
                tracing::info!(jobid, state = %outcome, "Job finished");
                return Ok(());
            }
            Err(e @ (MyqsError::StateConflict { .. } | MyqsError::JobNotFound(_))) => {
                attempt += 1;
                if attempt >= FINISH_RETRIES {
                    return Err(e);
                }
                tokio::time::sleep(FINISH_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::JobRecord;
    use tempfile::TempDir;

    fn running(store: &JobStore, jobid: u32, command: &str, dir: &Path) {
        let mut rec = JobRecord::queued(jobid);
        rec.state = JobState::Running;
        rec.set("COMMAND", command)
            .set("DIRECTORY", dir.display().to_string())
            .set("START", "1700000000");
        store.persist(&rec).unwrap();
    }

    #[tokio::test]
    async fn successful_command_ends_done() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        running(&store, 1, "touch proof.txt", dir.path());

        run_job(&store, 1).await.unwrap();

        let rec = store.load(1).unwrap().unwrap();
        assert_eq!(rec.state, JobState::Done);
        assert!(rec.finish().is_some());
        assert!(dir.path().join("proof.txt").exists());
    }

    #[tokio::test]
    async fn nonzero_exit_ends_failed() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        running(&store, 2, "exit 3", dir.path());

        run_job(&store, 2).await.unwrap();
        assert_eq!(store.load(2).unwrap().unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn finish_time_is_journaled_even_when_the_transition_fails() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        // Already terminal, as after a duplicate delivery: the transition
        // can never succeed, but the journal line must still land.
        let mut rec = JobRecord::queued(4);
        rec.state = JobState::Failed;
        rec.set("COMMAND", "true");
        store.persist(&rec).unwrap();

        assert!(run_job(&store, 4).await.is_err());
        assert!(store.load(4).unwrap().unwrap().finish().is_some());
    }

    #[tokio::test]
    async fn missing_job_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        assert!(matches!(
            run_job(&store, 99).await,
            Err(MyqsError::JobNotFound(99))
        ));
    }

    #[tokio::test]
    async fn racing_record_write_is_retried() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        // Record still queued, as if the daemon's post-spawn write is late.
        let mut rec = JobRecord::queued(3);
        rec.set("COMMAND", "true");
        store.persist(&rec).unwrap();

        let late_store = store.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            late_store
                .transition(3, JobState::Queued, JobState::Running, |r| {
                    r.set("PGID", "12345");
                })
                .unwrap();
        });

        run_job(&store, 3).await.unwrap();
        writer.await.unwrap();
        assert_eq!(store.load(3).unwrap().unwrap().state, JobState::Done);
    }
}

//! Job status reporting for `myqstat`.
//!
//! The reporter is a read-side client of the spool: it lists records, derives
//! display state, and tails job logs. It has one write privilege: a running
//! record whose process group is gone is reported as `STOP` once and then
//! evicted, so the stopped job shows up exactly one more time after dying.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::lock::DaemonLock;
use crate::process::pgid_alive;
use crate::spool::{JobRecord, JobState, JobStore, Queue};

/// How many trailing log lines each job carries in the report.
const TAIL_LINES: usize = 2;

/// A liveness probe can race a process-group handoff right after spawn, so a
/// dead result is confirmed once after a short pause.
const RECHECK_DELAY: Duration = Duration::from_millis(250);

/// Display state: the record states plus `Stop` for a running record whose
/// process group no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Queued,
    Running,
    Done,
    Failed,
    Stop,
}

impl DisplayState {
    pub fn label(self) -> &'static str {
        match self {
            DisplayState::Queued => "QUEUED",
            DisplayState::Running => "RUNNING",
            DisplayState::Done => "DONE",
            DisplayState::Failed => "FAILED",
            DisplayState::Stop => "STOP",
        }
    }
}

impl From<JobState> for DisplayState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => DisplayState::Queued,
            JobState::Running => DisplayState::Running,
            JobState::Done => DisplayState::Done,
            JobState::Failed => DisplayState::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRow {
    pub jobid: u32,
    pub state: DisplayState,
    pub queue: Queue,
    pub ncpus: u32,
    pub jobname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etime_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logfile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tail: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub daemon_alive: bool,
    pub jobs: Vec<JobRow>,
}

pub struct StatusReporter {
    store: JobStore,
    lock: DaemonLock,
}

impl StatusReporter {
    pub fn new(store: JobStore, lock: DaemonLock) -> Self {
        Self { store, lock }
    }

    /// Build a report. With an empty `ids` every job is listed, terminal
    /// ones only when `include_terminal` is set; explicitly requested IDs
    /// are always shown and unknown IDs are silently skipped.
    pub fn report(&self, ids: &[u32], include_terminal: bool) -> Result<Report> {
        let records = if ids.is_empty() {
            self.store
                .jobs()?
                .into_iter()
                .filter(|rec| include_terminal || !rec.state.is_terminal())
                .collect()
        } else {
            let mut records = Vec::with_capacity(ids.len());
            for &id in ids {
                if let Some(rec) = self.store.load(id)? {
                    records.push(rec);
                }
            }
            records
        };

        let jobs = records.into_iter().map(|rec| self.build_row(rec)).collect();
        Ok(Report {
            daemon_alive: self.lock.check(),
            jobs,
        })
    }

    fn build_row(&self, rec: JobRecord) -> JobRow {
        let mut state = DisplayState::from(rec.state);
        if rec.state == JobState::Running && !self.group_alive(&rec) {
            state = DisplayState::Stop;
            if let Err(e) = self.store.remove(rec.jobid) {
                tracing::warn!(jobid = rec.jobid, error = %e, "Could not evict stopped job");
            }
        }

        let tail = rec
            .logfile()
            .map(|path| log_tail(path, TAIL_LINES))
            .unwrap_or_default();

        JobRow {
            jobid: rec.jobid,
            state,
            queue: rec.queue(),
            ncpus: rec.ncpus(),
            jobname: rec.jobname().to_string(),
            etime_secs: rec.etime(Utc::now().timestamp()),
            directory: rec.directory().map(str::to_string),
            command: rec.command().map(str::to_string),
            logfile: rec.logfile().map(str::to_string),
            start: rec.start(),
            finish: rec.finish(),
            tail,
        }
    }

    fn group_alive(&self, rec: &JobRecord) -> bool {
        let Some(pgid) = rec.pgid() else {
            return false;
        };
        if pgid_alive(pgid) {
            return true;
        }
        std::thread::sleep(RECHECK_DELAY);
        pgid_alive(pgid)
    }
}

/// Last `n` non-blank lines of a log file; missing or unreadable logs read
/// as empty.
fn log_tail(path: &str, n: usize) -> Vec<String> {
    let Ok(bytes) = std::fs::read(path) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let mut tail: Vec<String> = text
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .take(n)
        .map(str::to_string)
        .collect();
    tail.reverse();
    tail
}

/// Elapsed time as `H:MM:SS`.
pub fn format_etime(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Fixed-width table in the classic batch-queue layout. `verbose` adds the
/// per-job detail block under each row.
pub fn render_table(report: &Report, verbose: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>6} {:<8} {:<8} {:>5} {:>9}  {}\n",
        "JOBID", "STATE", "QUEUE", "NCPUS", "ELAPSED", "JOBNAME"
    ));
    for job in &report.jobs {
        let elapsed = job
            .etime_secs
            .map(format_etime)
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:>6} {:<8} {:<8} {:>5} {:>9}  {}\n",
            job.jobid,
            job.state.label(),
            job.queue,
            job.ncpus,
            elapsed,
            job.jobname
        ));
        if verbose {
            push_detail(&mut out, "Directory", job.directory.as_deref());
            push_detail(&mut out, "Command", job.command.as_deref());
            push_detail(&mut out, "Logfile", job.logfile.as_deref());
            push_detail(&mut out, "Started", job.start.map(format_stamp).as_deref());
            push_detail(&mut out, "Finished", job.finish.map(format_stamp).as_deref());
        }
        for line in &job.tail {
            out.push_str(&format!("       > {}\n", line));
        }
    }
    out
}

fn push_detail(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        out.push_str(&format!("       {:<10} {}\n", format!("{}:", label), value));
    }
}

fn format_stamp(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| epoch.to_string())
}

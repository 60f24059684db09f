//! On-disk job store.
//!
//! Each job owns exactly one record file `{jobid}.job` in the per-host spool
//! directory, so a job can never carry two states at once. Records are
//! newline-delimited `KEY=VALUE` text with the state as an explicit `STATE`
//! attribute; see [`record::JobRecord`] for the codec.
//!
//! All mutation funnels through an atomic write-then-rename, so concurrent
//! readers (the status reporter, a restarting daemon) observe either the old
//! or the new record, never a torn one. State transitions additionally check
//! the expected source state before rewriting, which turns scheduler/executor
//! races into a recoverable [`MyqsError::StateConflict`].

pub mod record;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use record::{JobRecord, JobState, Queue};

use crate::error::{MyqsError, Result};

const RECORD_EXT: &str = "job";

#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the store and its directory.
    pub fn init(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        std::fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, jobid: u32) -> PathBuf {
        self.dir.join(format!("{}.{}", jobid, RECORD_EXT))
    }

    /// Load one record. A missing or unreadable file is `Ok(None)`: records
    /// vanish between listing and reading whenever the daemon and reporter
    /// race, and that must read as "no such job" rather than an error.
    pub fn load(&self, jobid: u32) -> Result<Option<JobRecord>> {
        match std::fs::read_to_string(self.record_path(jobid)) {
            Ok(text) => Ok(Some(JobRecord::parse(jobid, &text))),
            Err(_) => Ok(None),
        }
    }

    /// All records, sorted by job ID ascending.
    pub fn jobs(&self) -> Result<Vec<JobRecord>> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rec) = self.load(id)? {
                jobs.push(rec);
            }
        }
        Ok(jobs)
    }

    /// Records currently in `state`, sorted by job ID ascending.
    pub fn jobs_in(&self, state: JobState) -> Result<Vec<JobRecord>> {
        Ok(self
            .jobs()?
            .into_iter()
            .filter(|rec| rec.state == state)
            .collect())
    }

    /// Write a record atomically: a temp file in the same directory is
    /// renamed over the final path, so readers never see a partial record.
    pub fn persist(&self, record: &JobRecord) -> Result<()> {
        let path = self.record_path(record.jobid);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, record.encode())?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Append one `KEY=VALUE` line to an existing record. Duplicate keys are
    /// fine (last occurrence wins on parse), which makes this safe to use as
    /// a crash journal before a full rewrite.
    pub fn append(&self, jobid: u32, key: &str, value: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.record_path(jobid))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MyqsError::JobNotFound(jobid),
                _ => MyqsError::Io(e),
            })?;
        writeln!(file, "{}={}", key, value)?;
        Ok(())
    }

    /// Compare-and-swap state transition: the record must currently be in
    /// `from`, the edit closure is applied, the state becomes `to`, and the
    /// result is persisted atomically. Returns the updated record.
    pub fn transition(
        &self,
        jobid: u32,
        from: JobState,
        to: JobState,
        edit: impl FnOnce(&mut JobRecord),
    ) -> Result<JobRecord> {
        let mut record = self.load(jobid)?.ok_or(MyqsError::JobNotFound(jobid))?;
        if record.state != from {
            return Err(MyqsError::StateConflict {
                jobid,
                expected: from,
                found: record.state,
            });
        }
        edit(&mut record);
        record.state = to;
        self.persist(&record)?;
        Ok(record)
    }

    /// Delete a record; deleting an already-gone record is a no-op.
    pub fn remove(&self, jobid: u32) -> Result<()> {
        match std::fs::remove_file(self.record_path(jobid)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Lifecycle state of a job.
///
/// `Queued -> Running` happens on admission, `Running -> Done|Failed` when
/// the executor finishes, and `Running -> Queued` is the single back-edge
/// taken by crash recovery. Terminal records only ever get deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "failed" => Ok(JobState::Failed),
            _ => Err(()),
        }
    }
}

/// The two admission queues. Express is always drained before normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Queue {
    Express,
    Normal,
}

impl Queue {
    pub fn as_str(self) -> &'static str {
        match self {
            Queue::Express => "express",
            Queue::Normal => "normal",
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Queue {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "express" => Ok(Queue::Express),
            "normal" => Ok(Queue::Normal),
            _ => Err(()),
        }
    }
}

/// One job's metadata: its state plus a `KEY=VALUE` attribute map.
///
/// Records are a soft, advisory format. Parsing keeps every line containing
/// a `=` (split on the first occurrence, later duplicates win) and silently
/// drops everything else, so a torn or hand-edited record degrades to
/// missing attributes rather than an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub jobid: u32,
    pub state: JobState,
    attrs: BTreeMap<String, String>,
}

const STATE_KEY: &str = "STATE";

impl JobRecord {
    /// Fresh queued record with no attributes.
    pub fn queued(jobid: u32) -> Self {
        Self {
            jobid,
            state: JobState::Queued,
            attrs: BTreeMap::new(),
        }
    }

    /// Parse a record from its on-disk text. Never fails; unknown or
    /// malformed content is ignored and a missing `STATE` means queued.
    pub fn parse(jobid: u32, text: &str) -> Self {
        let mut attrs = BTreeMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                attrs.insert(key.to_string(), value.to_string());
            }
        }
        let state = attrs
            .remove(STATE_KEY)
            .and_then(|s| s.parse().ok())
            .unwrap_or(JobState::Queued);
        Self {
            jobid,
            state,
            attrs,
        }
    }

    /// Render the record as newline-delimited `KEY=VALUE` text.
    pub fn encode(&self) -> String {
        let mut out = format!("{}={}\n", STATE_KEY, self.state);
        for (key, value) in &self.attrs {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn clear(&mut self, key: &str) -> &mut Self {
        self.attrs.remove(key);
        self
    }

    /// Attribute map view, used by tests and the status reporter.
    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn queue(&self) -> Queue {
        self.get("QUEUE")
            .and_then(|q| q.parse().ok())
            .unwrap_or(Queue::Normal)
    }

    /// Slot cost of the job; a missing or malformed `NCPUS` costs one slot.
    pub fn ncpus(&self) -> u32 {
        self.get("NCPUS")
            .and_then(|n| n.parse().ok())
            .filter(|&n| n >= 1)
            .unwrap_or(1)
    }

    pub fn jobname(&self) -> &str {
        self.get("JOBNAME").unwrap_or("")
    }

    pub fn directory(&self) -> Option<&str> {
        self.get("DIRECTORY")
    }

    pub fn command(&self) -> Option<&str> {
        self.get("COMMAND")
    }

    pub fn pgid(&self) -> Option<i32> {
        self.get("PGID").and_then(|p| p.parse().ok())
    }

    pub fn logfile(&self) -> Option<&str> {
        self.get("LOGFILE")
    }

    pub fn start(&self) -> Option<i64> {
        self.get("START").and_then(|t| t.parse().ok())
    }

    pub fn finish(&self) -> Option<i64> {
        self.get("FINISH").and_then(|t| t.parse().ok())
    }

    /// Elapsed seconds: `FINISH - START` once terminal, `now - START` while
    /// running, absent while queued.
    pub fn etime(&self, now: i64) -> Option<i64> {
        let start = self.start()?;
        match self.state {
            JobState::Queued => None,
            JobState::Running => Some((now - start).max(0)),
            JobState::Done | JobState::Failed => {
                self.finish().map(|finish| (finish - start).max(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Done,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("zombie".parse::<JobState>().is_err());
    }

    #[test]
    fn parse_splits_on_first_equals_and_skips_garbage() {
        let rec = JobRecord::parse(7, "COMMAND=make A=B\nnot a record line\nNCPUS=2\n");
        assert_eq!(rec.command(), Some("make A=B"));
        assert_eq!(rec.ncpus(), 2);
        assert_eq!(rec.state, JobState::Queued);
    }

    #[test]
    fn later_duplicate_wins() {
        let rec = JobRecord::parse(1, "NCPUS=1\nNCPUS=4\n");
        assert_eq!(rec.ncpus(), 4);
    }

    #[test]
    fn encode_parse_round_trip() {
        let mut rec = JobRecord::queued(12);
        rec.set("QUEUE", "normal")
            .set("NCPUS", "2")
            .set("JOBNAME", "build.sh");
        let parsed = JobRecord::parse(12, &rec.encode());
        assert_eq!(parsed, rec);
        assert_eq!(parsed.attrs(), rec.attrs());
    }

    #[test]
    fn defaults_for_missing_attributes() {
        let rec = JobRecord::queued(1);
        assert_eq!(rec.queue(), Queue::Normal);
        assert_eq!(rec.ncpus(), 1);
        assert_eq!(rec.jobname(), "");
        assert!(rec.pgid().is_none());
    }

    #[test]
    fn etime_rules() {
        let mut rec = JobRecord::queued(3);
        assert_eq!(rec.etime(100), None);

        rec.state = JobState::Running;
        rec.set("START", "40");
        assert_eq!(rec.etime(100), Some(60));

        rec.state = JobState::Done;
        rec.set("FINISH", "90");
        assert_eq!(rec.etime(100), Some(50));
    }
}

use std::path::PathBuf;

use chrono::Utc;

use crate::error::Result;
use crate::process::pgid_alive;
use crate::scheduler::launch::Launcher;
use crate::spool::{JobRecord, JobState, JobStore, Queue};

/// Slot-budget admission over the on-disk queue.
pub struct Scheduler {
    store: JobStore,
    slots: u32,
    total_cores: u32,
    launcher: Box<dyn Launcher>,
}

impl Scheduler {
    pub fn new(store: JobStore, slots: u32, launcher: Box<dyn Launcher>) -> Self {
        Self {
            store,
            slots,
            total_cores: num_cpus::get() as u32,
            launcher,
        }
    }

    /// Override the detected core count. Used by tests.
    pub fn with_total_cores(mut self, total_cores: u32) -> Self {
        self.total_cores = total_cores;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Free slots under the budget, derived from the running records.
    ///
    /// Running records whose process group has vanished are deleted on the
    /// spot; they describe work nobody is doing. When nothing at all is
    /// running the count resets to the machine's full core count rather than
    /// the configured budget, so an idle machine will always accept one job
    /// even if it is wider than the budget.
    pub fn free_slots(&self) -> Result<u32> {
        let mut used = 0u32;
        let mut any_running = false;
        for rec in self.store.jobs_in(JobState::Running)? {
            if rec.pgid().map(pgid_alive).unwrap_or(false) {
                any_running = true;
                used += rec.ncpus();
            } else {
                tracing::warn!(jobid = rec.jobid, "Removing running record with no live process group");
                self.store.remove(rec.jobid)?;
            }
        }
        if !any_running {
            return Ok(self.total_cores);
        }
        Ok(self.slots.saturating_sub(used))
    }

    /// Try to start one job from `queue`: the lowest-ID queued job whose CPU
    /// request fits in `free` slots. Returns the started job's record.
    pub fn attempt(&self, queue: Queue, free: u32) -> Result<Option<JobRecord>> {
        for rec in self.store.jobs_in(JobState::Queued)? {
            if rec.queue() != queue || rec.ncpus() > free {
                continue;
            }
            let logfile = self.choose_log_path(&rec);
            let pgid = self.launcher.launch(&rec, &logfile)?;
            let started = self
                .store
                .transition(rec.jobid, JobState::Queued, JobState::Running, |r| {
                    r.set("PGID", pgid.to_string());
                    r.set("START", Utc::now().timestamp().to_string());
                    r.set("LOGFILE", logfile.display().to_string());
                })?;
            tracing::info!(
                jobid = rec.jobid,
                queue = %queue,
                ncpus = rec.ncpus(),
                pgid,
                "Job started"
            );
            return Ok(Some(started));
        }
        Ok(None)
    }

    /// One scheduling pass: express strictly first, then normal, one
    /// admission each. The express job's CPU cost is charged before the
    /// normal queue is considered. Returns the started job IDs.
    pub fn pass(&self) -> Result<Vec<u32>> {
        let mut free = self.free_slots()?;
        let mut started = Vec::new();
        if let Some(rec) = self.attempt(Queue::Express, free)? {
            free = free.saturating_sub(rec.ncpus());
            started.push(rec.jobid);
        }
        if let Some(rec) = self.attempt(Queue::Normal, free)? {
            started.push(rec.jobid);
        }
        Ok(started)
    }

    /// Job log goes next to the job's working directory when that is
    /// writable, otherwise into the user's home directory, named
    /// `{jobname}.o{jobid}` in the style of classic batch systems.
    fn choose_log_path(&self, rec: &JobRecord) -> PathBuf {
        let jobname = rec.jobname();
        let stem = std::path::Path::new(jobname)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("job");
        let name = format!("{}.o{}", stem, rec.jobid);

        if let Some(dir) = rec.directory() {
            let candidate = std::path::Path::new(dir).join(&name);
            let writable = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&candidate)
                .is_ok();
            if writable {
                return candidate;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| self.store.dir().to_path_buf())
            .join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records launches and hands back a fixed PGID without forking.
    struct FakeLauncher {
        pgid: i32,
        launched: Mutex<Vec<u32>>,
    }

    impl FakeLauncher {
        fn alive() -> Self {
            Self {
                pgid: nix::unistd::getpgrp().as_raw(),
                launched: Mutex::new(Vec::new()),
            }
        }
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, record: &JobRecord, _logfile: &Path) -> Result<i32> {
            self.launched.lock().unwrap().push(record.jobid);
            Ok(self.pgid)
        }
    }

    fn queued(store: &JobStore, jobid: u32, queue: &str, ncpus: u32, dir: &Path) {
        let mut rec = JobRecord::queued(jobid);
        rec.set("QUEUE", queue);
        rec.set("NCPUS", ncpus.to_string());
        rec.set("JOBNAME", format!("job{}.sh", jobid));
        rec.set("DIRECTORY", dir.display().to_string());
        rec.set("COMMAND", "true");
        store.persist(&rec).unwrap();
    }

    fn running(store: &JobStore, jobid: u32, ncpus: u32, pgid: i32) {
        let mut rec = JobRecord::queued(jobid);
        rec.state = JobState::Running;
        rec.set("NCPUS", ncpus.to_string());
        rec.set("COMMAND", "sleep 60");
        rec.set("PGID", pgid.to_string());
        store.persist(&rec).unwrap();
    }

    fn scheduler(store: &JobStore, slots: u32) -> Scheduler {
        Scheduler::new(store.clone(), slots, Box::new(FakeLauncher::alive()))
    }

    #[test]
    fn admits_lowest_jobid_first() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        queued(&store, 7, "normal", 1, dir.path());
        queued(&store, 5, "normal", 1, dir.path());

        let sched = scheduler(&store, 4).with_total_cores(4);
        let started = sched.pass().unwrap();
        assert_eq!(started, vec![5]);

        let rec = store.load(5).unwrap().unwrap();
        assert_eq!(rec.state, JobState::Running);
        assert!(rec.pgid().is_some());
        assert!(rec.start().is_some());
        assert!(rec.logfile().is_some());
        assert_eq!(store.load(7).unwrap().unwrap().state, JobState::Queued);
    }

    #[test]
    fn express_runs_before_older_normal_job() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        queued(&store, 2, "normal", 1, dir.path());
        queued(&store, 9, "express", 1, dir.path());

        let sched = scheduler(&store, 4).with_total_cores(4);
        assert_eq!(sched.pass().unwrap(), vec![9, 2]);
    }

    #[test]
    fn full_budget_blocks_admission() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        let own = nix::unistd::getpgrp().as_raw();
        running(&store, 1, 2, own);
        queued(&store, 2, "normal", 1, dir.path());

        let sched = scheduler(&store, 2).with_total_cores(8);
        assert_eq!(sched.free_slots().unwrap(), 0);
        assert!(sched.pass().unwrap().is_empty());
        assert_eq!(store.load(2).unwrap().unwrap().state, JobState::Queued);
    }

    #[test]
    fn express_admission_is_charged_against_normal() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        queued(&store, 1, "express", 2, dir.path());
        queued(&store, 2, "normal", 1, dir.path());

        let sched = scheduler(&store, 2).with_total_cores(2);
        assert_eq!(sched.pass().unwrap(), vec![1]);
        assert_eq!(store.load(2).unwrap().unwrap().state, JobState::Queued);
    }

    #[test]
    fn idle_machine_offers_full_core_count() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        queued(&store, 1, "normal", 4, dir.path());

        // Budget of 1, but nothing is running, so the core count applies.
        let sched = scheduler(&store, 1).with_total_cores(8);
        assert_eq!(sched.free_slots().unwrap(), 8);
        assert_eq!(sched.pass().unwrap(), vec![1]);
    }

    #[test]
    fn vanished_running_record_is_deleted() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        running(&store, 1, 2, 999_999_999);

        let sched = scheduler(&store, 2).with_total_cores(8);
        assert_eq!(sched.free_slots().unwrap(), 8);
        assert!(store.load(1).unwrap().is_none());
    }

    #[test]
    fn oversized_job_is_skipped_for_a_later_fit() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        let own = nix::unistd::getpgrp().as_raw();
        running(&store, 1, 1, own);
        queued(&store, 2, "normal", 8, dir.path());
        queued(&store, 3, "normal", 1, dir.path());

        let sched = scheduler(&store, 4).with_total_cores(8);
        assert_eq!(sched.free_slots().unwrap(), 3);
        assert_eq!(sched.pass().unwrap(), vec![3]);
        assert_eq!(store.load(2).unwrap().unwrap().state, JobState::Queued);
    }
}

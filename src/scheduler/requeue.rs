use crate::error::Result;
use crate::process::pgid_alive;
use crate::spool::{JobState, JobStore};

/// Crash recovery, run once before the daemon starts scheduling.
///
/// A running record whose process group is gone belongs to a job that was cut
/// down by a daemon crash or a reboot, so it goes back to the queue and will
/// be restarted from scratch. Launch bookkeeping from the dead run (PGID,
/// start time, log path) is cleared; everything the submitter set is kept.
/// Running jobs whose group is still alive are left alone and simply continue
/// to occupy slots.
///
/// Returns the IDs of the requeued jobs, ascending.
pub fn requeue(store: &JobStore) -> Result<Vec<u32>> {
    let mut requeued = Vec::new();
    for rec in store.jobs_in(JobState::Running)? {
        if rec.pgid().map(pgid_alive).unwrap_or(false) {
            continue;
        }
        store.transition(rec.jobid, JobState::Running, JobState::Queued, |r| {
            r.clear("PGID");
            r.clear("START");
            r.clear("LOGFILE");
        })?;
        tracing::info!(jobid = rec.jobid, "Requeued job from interrupted run");
        requeued.push(rec.jobid);
    }
    Ok(requeued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::JobRecord;
    use tempfile::TempDir;

    fn running_record(jobid: u32, pgid: i32) -> JobRecord {
        let mut rec = JobRecord::queued(jobid);
        rec.state = JobState::Running;
        rec.set("COMMAND", "sleep 60")
            .set("QUEUE", "express")
            .set("PGID", pgid.to_string())
            .set("START", "1700000000")
            .set("LOGFILE", "/tmp/job.o1");
        rec
    }

    #[test]
    fn dead_group_goes_back_to_queue() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        // PID max on Linux is bounded well below this, so the group is dead.
        store.persist(&running_record(3, 999_999_999)).unwrap();

        let requeued = requeue(&store).unwrap();
        assert_eq!(requeued, vec![3]);

        let rec = store.load(3).unwrap().unwrap();
        assert_eq!(rec.state, JobState::Queued);
        assert_eq!(rec.pgid(), None);
        assert_eq!(rec.start(), None);
        assert_eq!(rec.logfile(), None);
        // Submission attributes survive the requeue.
        assert_eq!(rec.command(), Some("sleep 60"));
        assert_eq!(rec.queue(), crate::spool::Queue::Express);
    }

    #[test]
    fn live_group_is_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        let own_pgid = nix::unistd::getpgrp().as_raw();
        store.persist(&running_record(4, own_pgid)).unwrap();

        assert!(requeue(&store).unwrap().is_empty());
        assert_eq!(store.load(4).unwrap().unwrap().state, JobState::Running);
    }

    #[test]
    fn requeue_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        store.persist(&running_record(7, 999_999_999)).unwrap();

        assert_eq!(requeue(&store).unwrap(), vec![7]);
        assert!(requeue(&store).unwrap().is_empty());
        assert_eq!(store.load(7).unwrap().unwrap().state, JobState::Queued);
    }
}

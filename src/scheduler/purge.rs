use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::spool::JobStore;

/// Delete finished records older than `retention`, judged by the record
/// file's modification time. The final write to a record happens at its
/// terminal transition, so mtime is the completion time for purposes here.
pub fn purge(store: &JobStore, retention: Duration) -> Result<Vec<u32>> {
    purge_at(store, retention, SystemTime::now())
}

/// [`purge`] with an injectable clock.
pub fn purge_at(store: &JobStore, retention: Duration, now: SystemTime) -> Result<Vec<u32>> {
    let mut purged = Vec::new();
    for rec in store.jobs()? {
        if !rec.state.is_terminal() {
            continue;
        }
        let mtime = match std::fs::metadata(store.record_path(rec.jobid)) {
            Ok(meta) => match meta.modified() {
                Ok(t) => t,
                Err(_) => continue,
            },
            // Already gone, nothing to purge.
            Err(_) => continue,
        };
        let age = match now.duration_since(mtime) {
            Ok(age) => age,
            // Future mtime (clock skew): not old, keep it.
            Err(_) => continue,
        };
        if age > retention {
            store.remove(rec.jobid)?;
            tracing::info!(jobid = rec.jobid, state = %rec.state, "Purged expired job record");
            purged.push(rec.jobid);
        }
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::{JobRecord, JobState};
    use tempfile::TempDir;

    fn record(jobid: u32, state: JobState) -> JobRecord {
        let mut rec = JobRecord::queued(jobid);
        rec.state = state;
        rec.set("COMMAND", "true");
        rec
    }

    #[test]
    fn keeps_records_younger_than_retention() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        store.persist(&record(1, JobState::Done)).unwrap();

        let now = SystemTime::now() + Duration::from_secs(3600);
        let purged = purge_at(&store, Duration::from_secs(7 * 24 * 3600), now).unwrap();
        assert!(purged.is_empty());
        assert!(store.load(1).unwrap().is_some());
    }

    #[test]
    fn removes_records_older_than_retention() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        store.persist(&record(1, JobState::Done)).unwrap();
        store.persist(&record(2, JobState::Failed)).unwrap();

        let now = SystemTime::now() + Duration::from_secs(8 * 24 * 3600);
        let purged = purge_at(&store, Duration::from_secs(7 * 24 * 3600), now).unwrap();
        assert_eq!(purged, vec![1, 2]);
        assert!(store.jobs().unwrap().is_empty());
    }

    #[test]
    fn retention_boundary_is_strictly_older_than() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        store.persist(&record(1, JobState::Done)).unwrap();
        let retention = Duration::from_secs(7 * 24 * 3600);
        let mtime = std::fs::metadata(store.record_path(1))
            .unwrap()
            .modified()
            .unwrap();

        // Exactly retention old: kept. One second past: deleted.
        assert!(purge_at(&store, retention, mtime + retention)
            .unwrap()
            .is_empty());
        assert!(store.load(1).unwrap().is_some());

        let purged =
            purge_at(&store, retention, mtime + retention + Duration::from_secs(1)).unwrap();
        assert_eq!(purged, vec![1]);
        assert!(store.load(1).unwrap().is_none());
    }

    #[test]
    fn never_touches_live_jobs() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::init(dir.path()).unwrap();
        store.persist(&record(1, JobState::Queued)).unwrap();
        store.persist(&record(2, JobState::Running)).unwrap();

        let now = SystemTime::now() + Duration::from_secs(30 * 24 * 3600);
        let purged = purge_at(&store, Duration::from_secs(7 * 24 * 3600), now).unwrap();
        assert!(purged.is_empty());
        assert_eq!(store.jobs().unwrap().len(), 2);
    }
}

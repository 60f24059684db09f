//! The scheduler daemon's main loop.
//!
//! Lifecycle: take the daemon lock, requeue jobs orphaned by a previous
//! crash, then loop scheduling passes until a shutdown signal arrives. The
//! loop is event driven: a filesystem watch on the spool directory wakes it
//! as soon as a record changes (a submission, an executor finishing), with a
//! short sleep as fallback so a missed event only delays a pass, never
//! stalls the queue.

use std::time::Instant;

use notify::{RecursiveMode, Watcher};

use crate::config::{DaemonConfig, SpoolConfig};
use crate::error::Result;
use crate::lock::DaemonLock;
use crate::scheduler::{purge, requeue, ExecLauncher, Scheduler};
use crate::shutdown::install_shutdown_handler;
use crate::spool::JobStore;

pub async fn run(spool: &SpoolConfig, config: DaemonConfig) -> Result<()> {
    spool.ensure()?;
    let store = JobStore::init(&spool.root)?;

    let lock = DaemonLock::new(spool.lock_path());
    let _guard = lock.acquire()?;

    let recovered = requeue(&store)?;
    if !recovered.is_empty() {
        tracing::info!(jobs = ?recovered, "Requeued jobs from a previous daemon");
    }

    let launcher = ExecLauncher::from_current_exe()?;
    let scheduler = Scheduler::new(store.clone(), config.slots, Box::new(launcher));
    let shutdown = install_shutdown_handler();

    // Wake on spool changes. tx is also kept here so rx never closes when
    // the watch cannot be established.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);
    let watch_tx = tx.clone();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = watch_tx.try_send(());
        }
    }) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Spool watch unavailable, polling only");
            None
        }
    };
    if let Some(w) = watcher.as_mut() {
        if let Err(e) = w.watch(store.dir(), RecursiveMode::NonRecursive) {
            tracing::warn!(error = %e, "Spool watch unavailable, polling only");
        }
    }

    tracing::info!(
        slots = config.slots,
        spool = %spool.root.display(),
        "Scheduler daemon running"
    );

    let mut last_purge: Option<Instant> = None;
    while !shutdown.is_cancelled() {
        if last_purge.map_or(true, |t| t.elapsed() >= config.purge_interval) {
            if let Err(e) = purge(&store, config.retention) {
                tracing::warn!(error = %e, "Purge failed");
            }
            last_purge = Some(Instant::now());
        }

        if let Err(e) = scheduler.pass() {
            tracing::warn!(error = %e, "Scheduling pass failed");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.pass_interval) => {}
            _ = rx.recv() => {
                // Drain the burst so one submission triggers one pass.
                while rx.try_recv().is_ok() {}
            }
        }
    }

    tracing::info!("Scheduler daemon shutting down");
    Ok(())
}

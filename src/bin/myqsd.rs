use std::process::Stdio;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use myqs::config::{DaemonConfig, SpoolConfig};
use myqs::daemon;
use myqs::error::{MyqsError, Result};
use myqs::executor;
use myqs::lock::DaemonLock;
use myqs::spool::JobStore;

/// MyQS scheduler daemon.
///
/// `myqsd <slots>` stops any daemon already running for this host, then
/// starts a fresh one in the background with the given CPU slot budget.
#[derive(Parser, Debug)]
#[command(name = "myqsd", version, about = "MyQS batch scheduler daemon")]
struct Args {
    /// CPU slot budget for admission, at most the machine's core count.
    slots: Option<u32>,

    /// Run the scheduling loop in this process instead of detaching.
    #[arg(long, hide = true)]
    daemon: bool,

    /// Execute one admitted job and exit (internal re-exec target).
    #[arg(long = "run-job", value_name = "JOBID", hide = true)]
    run_job: Option<u32>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("myqsd: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let spool = SpoolConfig::for_current_host()?;

    if let Some(jobid) = args.run_job {
        let store = JobStore::new(&spool.root);
        return executor::run_job(&store, jobid).await;
    }

    let slots = args
        .slots
        .ok_or_else(|| MyqsError::Config("missing slot count, usage: myqsd <slots>".into()))?;
    let config = DaemonConfig::with_slots(slots)?;

    if args.daemon {
        return daemon::run(&spool, config).await;
    }

    spool.ensure()?;
    let lock = DaemonLock::new(spool.lock_path());
    if lock.check() {
        println!("MyQS stopping the running scheduler daemon.");
        lock.stop_holder()?;
        // Give the old daemon a moment to exit and release its flock.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    relaunch_detached(&spool, slots)?;
    println!("MyQS scheduler daemon started with {} slots.", slots);
    Ok(())
}

/// Re-exec as `myqsd --daemon <slots>` detached from the terminal, with the
/// daemon's own output appended to the spool's log file.
fn relaunch_detached(spool: &SpoolConfig, slots: u32) -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(spool.daemon_log_path())?;

    std::process::Command::new(exe)
        .arg("--daemon")
        .arg(slots.to_string())
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .process_group(0)
        .spawn()
        .map_err(|e| MyqsError::Spawn(format!("daemon: {}", e)))?;
    Ok(())
}

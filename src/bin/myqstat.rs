use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use myqs::config::SpoolConfig;
use myqs::error::Result;
use myqs::lock::DaemonLock;
use myqs::spool::JobStore;
use myqs::status::{render_table, StatusReporter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// MyQS status reporter.
#[derive(Parser, Debug)]
#[command(name = "myqstat", version, about = "Show MyQS job status")]
struct Args {
    /// Include finished and failed jobs.
    #[arg(short = 'a')]
    all: bool,

    /// Show the per-job detail block.
    #[arg(short = 'f')]
    full: bool,

    /// Refresh the listing every two seconds.
    #[arg(short = 'w')]
    watch: bool,

    /// Output format.
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Job IDs to show; all jobs when omitted.
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    jobids: Vec<u32>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    match run(&Args::parse()) {
        Ok(daemon_alive) => std::process::exit(if daemon_alive { 0 } else { 1 }),
        Err(e) => {
            eprintln!("myqstat: {}", e);
            std::process::exit(2);
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let spool = SpoolConfig::for_current_host()?;
    let store = JobStore::new(&spool.root);
    let lock = DaemonLock::new(spool.lock_path());
    let reporter = StatusReporter::new(store, lock);

    loop {
        let report = reporter.report(&args.jobids, args.all)?;

        if args.watch {
            // Clear the screen and home the cursor between refreshes.
            print!("\x1b[2J\x1b[1;1H");
        }
        match args.output {
            OutputFormat::Table => {
                print!("{}", render_table(&report, args.full));
                if !report.daemon_alive {
                    eprintln!("myqstat: the MyQS scheduler daemon is not running");
                }
            }
            OutputFormat::Json => match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("myqstat: {}", e),
            },
        }

        if !args.watch {
            return Ok(report.daemon_alive);
        }
        std::thread::sleep(Duration::from_secs(2));
    }
}

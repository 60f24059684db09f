//! MyQS: a single-host batch job queuing system.
//!
//! Jobs live as plain-text records in a per-host spool directory. The
//! `myqsd` daemon admits queued jobs against a CPU slot budget and re-execs
//! itself to run each one; `myqstat` reads the same spool to report status.
//! All coordination goes through the filesystem, so every component can
//! crash and restart without losing jobs.

pub mod config;
pub mod daemon;
pub mod error;
pub mod executor;
pub mod lock;
pub mod process;
pub mod scheduler;
pub mod shutdown;
pub mod spool;
pub mod status;

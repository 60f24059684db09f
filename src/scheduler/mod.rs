//! Admission control and launch.
//!
//! The scheduler owns no in-memory job table: every pass re-derives the used
//! slot count from the on-disk records, so a restarted daemon picks up
//! exactly where the previous one left off. Admission is the only thing that
//! enforces the slot budget; there is no lock around it, which is safe
//! because the daemon lock guarantees a single scheduling process per host.

pub mod admission;
pub mod launch;
pub mod purge;
pub mod requeue;

pub use admission::Scheduler;
pub use launch::{ExecLauncher, Launcher};
pub use purge::{purge, purge_at};
pub use requeue::requeue;

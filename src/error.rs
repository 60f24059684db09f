use thiserror::Error;

use crate::spool::JobState;

#[derive(Error, Debug)]
pub enum MyqsError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Another scheduler daemon holds the lock")]
    LockHeld,

    #[error("Job not found: {0}")]
    JobNotFound(u32),

    #[error("Job {jobid}: expected state {expected}, found {found}")]
    StateConflict {
        jobid: u32,
        expected: JobState,
        found: JobState,
    },

    #[error("Failed to launch job: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MyqsError>;

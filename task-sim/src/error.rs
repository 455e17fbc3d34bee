use std::io;
use task_core::{InvariantViolation, TaskError};

#[derive(thiserror::Error, Debug)]
pub enum SimError {
    #[error("{0}")]
    Task(#[from] TaskError),

    #[error("invariant broken at {0}")]
    Invariant(#[from] InvariantViolation),

    /// The host refused to start a thread for a process.
    #[error("cannot start process thread: {0}")]
    Spawn(#[from] io::Error),

    /// Processes other than init survived the final reaping pass.
    #[error("{live} processes were never reaped")]
    Lost { live: usize },

    #[error("scenario failed: {0}")]
    Scenario(&'static str),
}

pub type SimResult<T> = Result<T, SimError>;

//! Scheduler error taxonomy.
//!
//! Only the synchronous trigger path surfaces these to the caller; inside the
//! polling loop every per-entry error is converted into a terminal `failed`
//! activity-log row (or logged and skipped when the store itself is down).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Rule is inactive: {0}")]
    InactiveRule(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

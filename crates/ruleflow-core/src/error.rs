//! Common error type for RuleFlow crates.

use thiserror::Error;

/// Errors shared across the RuleFlow workspace.
#[derive(Error, Debug)]
pub enum RuleFlowError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RuleFlowError>;

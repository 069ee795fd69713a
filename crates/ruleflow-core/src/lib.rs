//! # RuleFlow Core
//!
//! Shared foundation for the RuleFlow workspace: configuration loading and the
//! common error type. Kept dependency-light so every other crate can depend on
//! it without pulling in the scheduler stack.

pub mod config;
pub mod error;

pub use config::RuleFlowConfig;
pub use error::{Result, RuleFlowError};

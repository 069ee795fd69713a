//! # RuleFlow Scheduler
//!
//! Delayed-action scheduler and execution state machine for rule-based
//! "when X happens, do Y" automation. Rules pair a trigger with an action,
//! optionally delayed; delayed actions are persisted as activity-log rows and
//! picked up by a polling loop, so a process restart never loses them.
//!
//! ## Architecture
//! ```text
//! API layer
//!   ├── trigger_rule(rule_id) ────────┐
//!   ├── schedule_action(...) ──► activity_log row (status=scheduled)
//!   └── trigger_immediate_action(...) ──► executor ──► terminal row
//!
//! SchedulerEngine (tokio interval, default 10s)
//!   └── process_scheduled_actions
//!         ├── pending_scheduled: status=scheduled AND schedule_time <= now
//!         ├── claim: scheduled → processing   (at-most-once guard)
//!         ├── rule/action lookup → failed("Rule not found" / "Rule is
//!         │                                inactive" / "Action not found")
//!         └── ActionExecutor (capability registry, bounded by timeout)
//!               ├── webhook (HTTP POST)
//!               └── notify  (log record)
//!                     └── mark_executed: success | failed  (terminal)
//! ```
//!
//! Every transition out of `scheduled` is terminal and single-shot: terminal
//! rows never reappear in a poll, and `mark_executed` refuses rows that have
//! already left the claimable states. A claim that cannot reach a terminal
//! state (store error mid-entry) is released for retry on the next pass, and
//! rows left `processing` by a crash are re-queued when the engine starts.

pub mod activity;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod persistence;
pub mod rules;

pub use activity::{ActivityLog, ActivityStatus};
pub use dispatch::{NotifyHandler, WebhookHandler};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{ActionExecutor, ActionHandler, ExecutionOutcome};
pub use persistence::SchedulerDb;
pub use rules::{Action, ActionType, Rule};

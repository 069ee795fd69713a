//! Activity log — the durable record of every trigger and execution attempt.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::new_id;

/// One trigger event and its execution outcome.
///
/// Created once per trigger; the only mutations ever applied are the claim
/// transition (`Scheduled → Processing`) and a single terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    /// Unique entry ID.
    pub id: String,
    /// Rule this entry belongs to.
    pub rule_id: String,
    /// Current state.
    pub status: ActivityStatus,
    /// When the trigger fired (row creation time).
    pub triggered_at: DateTime<Utc>,
    /// When a scheduled entry becomes due. Always set while `Scheduled`.
    pub schedule_time: Option<DateTime<Utc>>,
    /// When execution completed (terminal states only).
    pub executed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the executor call, milliseconds.
    pub execution_duration_ms: Option<i64>,
    /// Inputs, outputs and errors (JSON).
    pub details: serde_json::Value,
}

/// Activity log entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    /// Waiting for its schedule_time to pass.
    Scheduled,
    /// Claimed by a poll pass; guards against overlapping passes.
    Processing,
    Success,
    Failed,
    Canceled,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Scheduled => "scheduled",
            ActivityStatus::Processing => "processing",
            ActivityStatus::Success => "success",
            ActivityStatus::Failed => "failed",
            ActivityStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => ActivityStatus::Scheduled,
            "processing" => ActivityStatus::Processing,
            "success" => ActivityStatus::Success,
            "canceled" => ActivityStatus::Canceled,
            _ => ActivityStatus::Failed,
        }
    }

    /// Terminal states never transition again and are excluded from polls.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityStatus::Success | ActivityStatus::Failed | ActivityStatus::Canceled
        )
    }
}

impl ActivityLog {
    /// Create a `scheduled` entry due `delay_mins` from now.
    ///
    /// `schedule_time` is exactly `triggered_at + delay_mins` — both computed
    /// from the same instant.
    pub fn scheduled(rule_id: &str, delay_mins: u32, details: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("log"),
            rule_id: rule_id.to_string(),
            status: ActivityStatus::Scheduled,
            triggered_at: now,
            schedule_time: Some(now + Duration::minutes(i64::from(delay_mins))),
            executed_at: None,
            execution_duration_ms: None,
            details,
        }
    }

    /// Create an already-terminal entry for the immediate trigger path:
    /// `triggered_at == executed_at == now`.
    pub fn executed(
        rule_id: &str,
        status: ActivityStatus,
        duration_ms: i64,
        details: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id("log"),
            rule_id: rule_id.to_string(),
            status,
            triggered_at: now,
            schedule_time: None,
            executed_at: Some(now),
            execution_duration_ms: Some(duration_ms),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_entry_invariant() {
        let entry = ActivityLog::scheduled("rule-1", 3, serde_json::json!({}));
        assert_eq!(entry.status, ActivityStatus::Scheduled);
        let due = entry.schedule_time.expect("scheduled entry must carry schedule_time");
        assert_eq!(due, entry.triggered_at + Duration::minutes(3));
        assert!(entry.executed_at.is_none());
    }

    #[test]
    fn test_executed_entry_timestamps_match() {
        let entry = ActivityLog::executed("rule-1", ActivityStatus::Success, 12, serde_json::json!({}));
        assert_eq!(entry.executed_at, Some(entry.triggered_at));
        assert_eq!(entry.execution_duration_ms, Some(12));
        assert!(entry.status.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ActivityStatus::Scheduled.is_terminal());
        assert!(!ActivityStatus::Processing.is_terminal());
        assert!(ActivityStatus::Success.is_terminal());
        assert!(ActivityStatus::Failed.is_terminal());
        assert!(ActivityStatus::Canceled.is_terminal());
    }
}

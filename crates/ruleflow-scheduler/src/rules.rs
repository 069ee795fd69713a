//! Rule and action definitions — the core data model for automation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An automation rule: when the trigger fires, run the action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule ID.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Trigger this rule reacts to (trigger definitions live outside the core).
    pub trigger_id: String,
    /// Action to run when triggered.
    pub action_id: String,
    /// Run immediately or after a delay.
    pub action_type: ActionType,
    /// Delay in minutes for scheduled rules (0 for immediate).
    pub schedule_delay_mins: u32,
    /// Opaque payload handed to the action handler (JSON).
    pub action_details: serde_json::Value,
    /// Inactive rules are never executed; a scheduled entry whose rule went
    /// inactive before its due time is marked failed at execution time.
    pub is_active: bool,
    /// Last successful execution. Set by the scheduler only, never on
    /// schedule creation.
    pub last_triggered: Option<DateTime<Utc>>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

/// When a triggered rule's action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Run synchronously on trigger.
    Immediate,
    /// Persist a scheduled entry, run when the delay elapses.
    Scheduled,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Immediate => "immediate",
            ActionType::Scheduled => "scheduled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => ActionType::Scheduled,
            _ => ActionType::Immediate,
        }
    }
}

impl Rule {
    /// Create a rule that runs its action immediately on trigger.
    pub fn immediate(
        name: &str,
        trigger_id: &str,
        action_id: &str,
        action_details: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id("rule"),
            name: name.to_string(),
            trigger_id: trigger_id.to_string(),
            action_id: action_id.to_string(),
            action_type: ActionType::Immediate,
            schedule_delay_mins: 0,
            action_details,
            is_active: true,
            last_triggered: None,
            created_at: Utc::now(),
        }
    }

    /// Create a rule whose action runs `delay_mins` after the trigger.
    pub fn scheduled(
        name: &str,
        trigger_id: &str,
        action_id: &str,
        delay_mins: u32,
        action_details: serde_json::Value,
    ) -> Self {
        Self {
            id: new_id("rule"),
            name: name.to_string(),
            trigger_id: trigger_id.to_string(),
            action_id: action_id.to_string(),
            action_type: ActionType::Scheduled,
            schedule_delay_mins: delay_mins,
            action_details,
            is_active: true,
            last_triggered: None,
            created_at: Utc::now(),
        }
    }
}

/// An action definition — what a rule does when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Unique action ID.
    pub id: String,
    /// Human-readable name (display only, never used for dispatch).
    pub name: String,
    /// Capability key the executor dispatches on: "webhook", "notify", ...
    pub kind: String,
    /// Handler configuration (JSON: url, headers, channel address, ...).
    pub config: serde_json::Value,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(name: &str, kind: &str, config: serde_json::Value) -> Self {
        Self {
            id: new_id("act"),
            name: name.to_string(),
            kind: kind.to_string(),
            config,
            created_at: Utc::now(),
        }
    }
}

/// Prefixed UUID v4, e.g. "rule-3f2a…".
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

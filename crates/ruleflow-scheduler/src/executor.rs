//! Action execution — capability-keyed handler registry.
//!
//! Dispatch is keyed by `Action.kind`, never by the display name: the
//! human-readable name is presentation, the kind is the contract. Handlers
//! report expected failures inside the returned outcome; an `Err`/panic is
//! reserved for infrastructure breakage. Every call is bounded by a timeout
//! so a hung handler cannot stall the rest of a poll pass forever.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::rules::Action;

/// Structured result of one action execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub executed_at: DateTime<Utc>,
    /// Action-specific output fields (JSON object), empty on failure.
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            executed_at: Utc::now(),
            output,
            error: None,
            error_code: None,
        }
    }

    pub fn fail(code: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            executed_at: Utc::now(),
            output: serde_json::Value::Null,
            error: Some(error.into()),
            error_code: Some(code.to_string()),
        }
    }

    /// Flatten into a JSON object suitable for merging into activity-log
    /// details: output fields on success, error/error_code on failure.
    pub fn into_details(self) -> serde_json::Value {
        let mut details = serde_json::Map::new();
        details.insert("executed_at".into(), serde_json::json!(self.executed_at.to_rfc3339()));
        if self.success {
            if let Some(fields) = self.output.as_object() {
                for (k, v) in fields {
                    details.insert(k.clone(), v.clone());
                }
            }
        } else {
            details.insert("error".into(), serde_json::json!(self.error));
            details.insert("error_code".into(), serde_json::json!(self.error_code));
        }
        serde_json::Value::Object(details)
    }
}

/// One capability: how to perform a given kind of side effect.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Capability key this handler serves ("webhook", "notify", ...).
    fn kind(&self) -> &str;

    /// Perform the side effect. Expected failures go into the outcome.
    async fn execute(&self, action: &Action, details: &serde_json::Value) -> ExecutionOutcome;
}

/// Registry of action handlers, dispatching on `Action.kind`.
pub struct ActionExecutor {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    timeout: Duration,
}

impl ActionExecutor {
    /// Create an empty registry with the given per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler for its capability kind. Re-registering a kind
    /// replaces the previous handler.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        tracing::debug!("🔌 Action handler registered: {}", handler.kind());
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    /// Registered capability kinds.
    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(|k| k.as_str()).collect()
    }

    /// Execute `action` with the trigger's details payload.
    /// Never returns an error: unknown kinds and timeouts become failed
    /// outcomes like any other expected failure.
    pub async fn execute(&self, action: &Action, details: &serde_json::Value) -> ExecutionOutcome {
        let Some(handler) = self.handlers.get(&action.kind) else {
            tracing::warn!("⚠️ No handler for action kind '{}' ({})", action.kind, action.name);
            return ExecutionOutcome::fail(
                "unknown_action_kind",
                format!("No handler registered for kind '{}'", action.kind),
            );
        };

        match tokio::time::timeout(self.timeout, handler.execute(action, details)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    "⏱️ Action '{}' ({}) timed out after {:?}",
                    action.name,
                    action.kind,
                    self.timeout
                );
                ExecutionOutcome::fail(
                    "timeout",
                    format!("Execution exceeded {} s", self.timeout.as_secs()),
                )
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Deterministic stand-in for external dispatch: succeeds or fails on
    /// command, optionally sleeping first.
    pub struct StubHandler {
        pub kind: String,
        pub succeed: bool,
        pub delay: Option<Duration>,
    }

    impl StubHandler {
        pub fn ok(kind: &str) -> Arc<Self> {
            Arc::new(Self { kind: kind.into(), succeed: true, delay: None })
        }

        pub fn failing(kind: &str) -> Arc<Self> {
            Arc::new(Self { kind: kind.into(), succeed: false, delay: None })
        }

        pub fn slow(kind: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self { kind: kind.into(), succeed: true, delay: Some(delay) })
        }
    }

    #[async_trait]
    impl ActionHandler for StubHandler {
        fn kind(&self) -> &str {
            &self.kind
        }

        async fn execute(&self, action: &Action, details: &serde_json::Value) -> ExecutionOutcome {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.succeed {
                ExecutionOutcome::ok(serde_json::json!({
                    "action": action.name,
                    "echo": details,
                }))
            } else {
                ExecutionOutcome::fail("stub_failure", "forced failure")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubHandler;
    use super::*;
    use serde_json::json;

    fn executor_with(handler: Arc<dyn ActionHandler>) -> ActionExecutor {
        let mut executor = ActionExecutor::new(Duration::from_millis(200));
        executor.register(handler);
        executor
    }

    #[tokio::test]
    async fn test_dispatch_by_kind() {
        let executor = executor_with(StubHandler::ok("webhook"));
        let action = Action::new("Send report", "webhook", json!({}));

        let outcome = executor.execute(&action, &json!({"x": 1})).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["echo"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_failed_outcome() {
        let executor = executor_with(StubHandler::ok("webhook"));
        let action = Action::new("Mystery", "carrier-pigeon", json!({}));

        let outcome = executor.execute(&action, &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("unknown_action_kind"));
    }

    #[tokio::test]
    async fn test_expected_failure_is_outcome_not_panic() {
        let executor = executor_with(StubHandler::failing("webhook"));
        let action = Action::new("Flaky", "webhook", json!({}));

        let outcome = executor.execute(&action, &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("stub_failure"));
        assert_eq!(outcome.error.as_deref(), Some("forced failure"));
    }

    #[tokio::test]
    async fn test_timeout_bounds_handler() {
        let mut executor = ActionExecutor::new(Duration::from_millis(20));
        executor.register(StubHandler::slow("webhook", Duration::from_secs(5)));
        let action = Action::new("Slowpoke", "webhook", json!({}));

        let outcome = executor.execute(&action, &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_outcome_into_details() {
        let details = ExecutionOutcome::ok(json!({"status": 200})).into_details();
        assert_eq!(details["status"], json!(200));
        assert!(details.get("error").is_none());

        let details = ExecutionOutcome::fail("timeout", "too slow").into_details();
        assert_eq!(details["error"], json!("too slow"));
        assert_eq!(details["error_code"], json!("timeout"));
    }
}

//! Scheduler Engine — schedule/trigger operations plus the polling loop that
//! executes due entries exactly once.
//!
//! Polling over in-memory timers is deliberate: a restart loses timers but not
//! persisted `scheduled` rows, so execution is eventually guaranteed, with
//! delay precision bounded by the poll interval (default 10s).

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::activity::{ActivityLog, ActivityStatus};
use crate::error::{Result, SchedulerError};
use crate::executor::ActionExecutor;
use crate::persistence::SchedulerDb;
use crate::rules::ActionType;

/// Default poll interval for the scheduled-action loop.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10_000;

struct LoopHandle {
    shutdown: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

/// The scheduler engine. One instance per process, constructed at boot with
/// its dependencies injected, then shared by handle with the API layer.
pub struct SchedulerEngine {
    db: Arc<SchedulerDb>,
    executor: Arc<ActionExecutor>,
    poll_interval: Duration,
    poller: Mutex<Option<LoopHandle>>,
}

impl SchedulerEngine {
    /// Create an engine over the given store and executor.
    pub fn new(db: Arc<SchedulerDb>, executor: ActionExecutor) -> Self {
        Self {
            db,
            executor: Arc::new(executor),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poller: Mutex::new(None),
        }
    }

    /// Override the default poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Shared store handle, for the API layer living in the same process.
    pub fn db(&self) -> &Arc<SchedulerDb> {
        &self.db
    }

    // ─── Lifecycle ──────────────────────────────────────

    /// Start the recurring poll loop. The first pass runs immediately.
    /// Idempotent: calling start while running logs a warning and returns.
    ///
    /// Before the loop spawns, any `processing` row left over from a crash
    /// mid-pass is re-queued to `scheduled` so it executes instead of
    /// staying stranded in a state no poll ever selects.
    pub async fn start(&self, interval_ms: Option<u64>) {
        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            tracing::warn!("⏰ Scheduler already running — start ignored");
            return;
        }

        match self.db.requeue_processing() {
            Ok(0) => {}
            Ok(n) => tracing::warn!("⚠️ Re-queued {n} stalled processing entries"),
            Err(e) => tracing::warn!("⚠️ Stalled-entry recovery failed: {e}"),
        }

        let period = interval_ms.map(Duration::from_millis).unwrap_or(self.poll_interval);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let db = Arc::clone(&self.db);
        let executor = Arc::clone(&self.executor);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_pass(&db, &executor).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("⏹️ Scheduler loop stopped");
        });

        tracing::info!("⏰ Scheduler started (poll every {period:?})");
        *poller = Some(LoopHandle { shutdown: shutdown_tx, _task: task });
    }

    /// Stop future polling. An in-flight pass finishes on its own; this never
    /// cancels an execution already underway. Idempotent.
    pub async fn stop(&self) {
        let mut poller = self.poller.lock().await;
        match poller.take() {
            Some(handle) => {
                let _ = handle.shutdown.send(true);
                tracing::info!("⏰ Scheduler stopping");
            }
            None => tracing::debug!("Scheduler not running — stop ignored"),
        }
    }

    /// Whether the poll loop is currently running.
    pub async fn is_running(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    // ─── Operations exposed to the API layer ──────────────────────────

    /// Create a `scheduled` activity-log entry due `delay_mins` from now.
    ///
    /// No rule validation happens here: a rule deleted or deactivated before
    /// the due time is discovered by the loop, which marks the entry failed.
    pub fn schedule_action(
        &self,
        rule_id: &str,
        delay_mins: u32,
        details: serde_json::Value,
    ) -> Result<ActivityLog> {
        let entry = ActivityLog::scheduled(rule_id, delay_mins, details);
        self.db.create_activity_log(&entry)?;
        tracing::info!(
            "📅 Action scheduled for rule {} — due {}",
            rule_id,
            entry.schedule_time.map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        Ok(entry)
    }

    /// Entry point for "a trigger fired for this rule": validates the rule,
    /// then routes to the scheduled or immediate path per its action type.
    pub async fn trigger_rule(&self, rule_id: &str) -> Result<ActivityLog> {
        let rule = self
            .db
            .get_rule(rule_id)?
            .ok_or_else(|| SchedulerError::RuleNotFound(rule_id.to_string()))?;
        if !rule.is_active {
            return Err(SchedulerError::InactiveRule(rule_id.to_string()));
        }

        match rule.action_type {
            ActionType::Scheduled => {
                self.schedule_action(&rule.id, rule.schedule_delay_mins, rule.action_details)
            }
            ActionType::Immediate => self.trigger_immediate_action(rule_id).await,
        }
    }

    /// Execute a rule's action synchronously, bypassing the loop.
    ///
    /// Fails without creating any activity-log entry when the rule is
    /// missing, inactive, or refers to a missing action; otherwise returns
    /// one already-terminal entry with `triggered_at == executed_at`.
    pub async fn trigger_immediate_action(&self, rule_id: &str) -> Result<ActivityLog> {
        let rule = self
            .db
            .get_rule(rule_id)?
            .ok_or_else(|| SchedulerError::RuleNotFound(rule_id.to_string()))?;
        if !rule.is_active {
            return Err(SchedulerError::InactiveRule(rule_id.to_string()));
        }
        let action = self
            .db
            .get_action(&rule.action_id)?
            .ok_or_else(|| SchedulerError::ActionNotFound(rule.action_id.clone()))?;

        let started = Instant::now();
        let outcome = self.executor.execute(&action, &rule.action_details).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        let success = outcome.success;

        let mut details = outcome.into_details();
        if let Some(map) = details.as_object_mut() {
            map.insert("input".into(), rule.action_details.clone());
        }
        let status = if success { ActivityStatus::Success } else { ActivityStatus::Failed };
        let entry = ActivityLog::executed(&rule.id, status, duration_ms, details);
        self.db.create_activity_log(&entry)?;

        if success {
            self.db.update_rule_last_triggered(&rule.id)?;
            tracing::info!("⚡ Rule '{}' executed immediately ({duration_ms}ms)", rule.name);
        } else {
            tracing::warn!("⚠️ Rule '{}' immediate execution failed", rule.name);
        }
        Ok(entry)
    }

    // ─── Poll loop ──────────────────────────────────────

    /// One poll pass: claim and execute every due `scheduled` entry.
    /// Returns the number of entries this pass claimed.
    pub async fn process_scheduled_actions(&self) -> usize {
        run_pass(&self.db, &self.executor).await
    }
}

/// One poll pass over the store. A failure in one entry never aborts the
/// rest of the pass.
async fn run_pass(db: &SchedulerDb, executor: &ActionExecutor) -> usize {
    let due = match db.pending_scheduled(Utc::now()) {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!("⚠️ Failed to query due actions: {e}");
            return 0;
        }
    };
    if due.is_empty() {
        return 0;
    }
    tracing::debug!("🔔 {} due scheduled action(s)", due.len());

    let mut claimed = 0;
    for entry in due {
        match db.claim(&entry.id) {
            Ok(true) => {}
            // Another pass won the race for this row.
            Ok(false) => continue,
            Err(e) => {
                tracing::warn!("⚠️ Claim failed for {}: {e}", entry.id);
                continue;
            }
        }
        claimed += 1;
        if let Err(e) = run_claimed_entry(db, executor, &entry).await {
            tracing::warn!("⚠️ Processing failed for {}, releasing claim: {e}", entry.id);
            if let Err(e) = db.release_claim(&entry.id) {
                tracing::warn!("⚠️ Claim release failed for {}: {e}", entry.id);
            }
        }
    }
    claimed
}

/// State machine for one claimed entry. Rule/action resolution failures
/// become terminal `failed` rows; only store errors propagate, and the pass
/// above then releases the claim so a later pass retries the entry.
async fn run_claimed_entry(
    db: &SchedulerDb,
    executor: &ActionExecutor,
    entry: &ActivityLog,
) -> Result<()> {
    let Some(rule) = db.get_rule(&entry.rule_id)? else {
        return fail_entry(db, entry, "Rule not found");
    };
    if !rule.is_active {
        return fail_entry(db, entry, "Rule is inactive");
    }
    let Some(action) = db.get_action(&rule.action_id)? else {
        return fail_entry(db, entry, "Action not found");
    };

    let started = Instant::now();
    let outcome = executor.execute(&action, &entry.details).await;
    let duration_ms = started.elapsed().as_millis() as i64;
    let success = outcome.success;

    let status = if success { ActivityStatus::Success } else { ActivityStatus::Failed };
    db.mark_executed(&entry.id, status, Some(duration_ms), Some(&outcome.into_details()))?;

    if success {
        db.update_rule_last_triggered(&rule.id)?;
        tracing::info!("✅ Scheduled action {} executed for rule '{}'", entry.id, rule.name);
    } else {
        tracing::warn!("❌ Scheduled action {} failed for rule '{}'", entry.id, rule.name);
    }
    Ok(())
}

/// Terminal `failed` transition with a distinguishing error string.
fn fail_entry(db: &SchedulerDb, entry: &ActivityLog, error: &str) -> Result<()> {
    tracing::warn!("❌ Scheduled action {} failed: {error}", entry.id);
    db.mark_executed(
        &entry.id,
        ActivityStatus::Failed,
        None,
        Some(&serde_json::json!({ "error": error })),
    )?;
    Ok(())
}

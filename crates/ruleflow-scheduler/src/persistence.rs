//! SQLite-backed persistence for rules, actions, and the activity log.
//! Survives restarts — the polling loop re-discovers persisted `scheduled`
//! rows, so no in-memory timer state is ever load-bearing.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;

use crate::activity::{ActivityLog, ActivityStatus};
use crate::error::{Result, SchedulerError};
use crate::rules::{Action, ActionType, Rule};

/// SQLite store shared by the scheduler engine and the API layer.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

impl SchedulerDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SchedulerError::Storage(format!("DB dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Automation rules: trigger → action, optionally delayed
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                trigger_id TEXT NOT NULL,
                action_id TEXT NOT NULL,
                action_type TEXT NOT NULL DEFAULT 'immediate',  -- 'immediate', 'scheduled'
                schedule_delay_mins INTEGER NOT NULL DEFAULT 0,
                action_details TEXT NOT NULL DEFAULT '{}',       -- JSON payload
                is_active INTEGER NOT NULL DEFAULT 1,
                last_triggered TEXT,
                created_at TEXT NOT NULL
            );

            -- Action definitions, dispatched by capability kind
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,                              -- 'webhook', 'notify', ...
                config TEXT NOT NULL DEFAULT '{}',               -- JSON handler config
                created_at TEXT NOT NULL
            );

            -- One row per trigger event; single terminal transition
            CREATE TABLE IF NOT EXISTS activity_log (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',        -- scheduled, processing, success, failed, canceled
                triggered_at TEXT NOT NULL,
                schedule_time TEXT,
                executed_at TEXT,
                execution_duration_ms INTEGER,
                details TEXT NOT NULL DEFAULT '{}'               -- JSON inputs/outputs/errors
            );

            CREATE INDEX IF NOT EXISTS idx_activity_status_due
                ON activity_log(status, schedule_time);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedulerError::Storage(format!("DB lock poisoned: {e}")))
    }

    // ─── Rules ──────────────────────────────────────

    /// Insert or update a rule.
    pub fn save_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO rules
             (id, name, trigger_id, action_id, action_type, schedule_delay_mins,
              action_details, is_active, last_triggered, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rule.id,
                rule.name,
                rule.trigger_id,
                rule.action_id,
                rule.action_type.as_str(),
                rule.schedule_delay_mins,
                rule.action_details.to_string(),
                rule.is_active as i32,
                rule.last_triggered.map(|t| t.to_rfc3339()),
                rule.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up a rule by ID.
    pub fn get_rule(&self, id: &str) -> Result<Option<Rule>> {
        let conn = self.lock()?;
        Ok(rule_row(&conn, id)?)
    }

    /// List all rules, oldest first.
    pub fn list_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{RULE_SELECT} ORDER BY created_at"))?;
        let rows = stmt.query_map([], map_rule)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a rule. Activity-log rows are kept; the loop marks any orphaned
    /// scheduled entry as failed when it comes due.
    pub fn delete_rule(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute("DELETE FROM rules WHERE id = ?1", [id])?;
        Ok(n == 1)
    }

    /// Toggle a rule on or off.
    pub fn set_rule_active(&self, id: &str, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE rules SET is_active = ?1 WHERE id = ?2",
            params![active as i32, id],
        )?;
        Ok(n == 1)
    }

    /// Stamp `last_triggered = now` after a successful execution.
    pub fn update_rule_last_triggered(&self, id: &str) -> Result<Option<Rule>> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE rules SET last_triggered = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Ok(None);
        }
        Ok(rule_row(&conn, id)?)
    }

    // ─── Actions ──────────────────────────────────────

    /// Insert or update an action definition.
    pub fn save_action(&self, action: &Action) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO actions (id, name, kind, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                action.id,
                action.name,
                action.kind,
                action.config.to_string(),
                action.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up an action by ID.
    pub fn get_action(&self, id: &str) -> Result<Option<Action>> {
        let conn = self.lock()?;
        let action = conn
            .query_row(
                "SELECT id, name, kind, config, created_at FROM actions WHERE id = ?1",
                [id],
                |row| {
                    Ok(Action {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        config: parse_json(row.get::<_, String>(3)?),
                        created_at: parse_ts(&row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(action)
    }

    // ─── Activity log ──────────────────────────────────────

    /// Insert a freshly created entry.
    pub fn create_activity_log(&self, entry: &ActivityLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activity_log
             (id, rule_id, status, triggered_at, schedule_time, executed_at,
              execution_duration_ms, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                entry.rule_id,
                entry.status.as_str(),
                entry.triggered_at.to_rfc3339(),
                entry.schedule_time.map(|t| t.to_rfc3339()),
                entry.executed_at.map(|t| t.to_rfc3339()),
                entry.execution_duration_ms,
                entry.details.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single entry.
    pub fn get_activity_log(&self, id: &str) -> Result<Option<ActivityLog>> {
        let conn = self.lock()?;
        Ok(log_row(&conn, id)?)
    }

    /// All entries in a given state, oldest trigger first.
    pub fn get_by_status(&self, status: ActivityStatus) -> Result<Vec<ActivityLog>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{LOG_SELECT} WHERE status = ?1 ORDER BY triggered_at"))?;
        let rows = stmt.query_map([status.as_str()], map_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All entries for one rule, newest first.
    pub fn logs_for_rule(&self, rule_id: &str) -> Result<Vec<ActivityLog>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare(&format!("{LOG_SELECT} WHERE rule_id = ?1 ORDER BY triggered_at DESC"))?;
        let rows = stmt.query_map([rule_id], map_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Scheduled entries whose due time has passed, earliest due first.
    /// Entries not yet due are left for a future pass.
    pub fn pending_scheduled(&self, now: DateTime<Utc>) -> Result<Vec<ActivityLog>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{LOG_SELECT} WHERE status = 'scheduled' AND schedule_time <= ?1
             ORDER BY schedule_time"
        ))?;
        let rows = stmt.query_map([now.to_rfc3339()], map_log)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Claim an entry for execution: `scheduled → processing`, conditional on
    /// the row still being `scheduled`. Returns true iff this caller won.
    /// Overlapping poll passes racing for the same row resolve here — at most
    /// one claim ever succeeds per entry.
    pub fn claim(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE activity_log SET status = 'processing'
             WHERE id = ?1 AND status = 'scheduled'",
            [id],
        )?;
        Ok(n == 1)
    }

    /// Release a claim: `processing → scheduled`, conditional on the row
    /// still being `processing`. Used when a post-claim store error prevents
    /// reaching a terminal state, so the next pass retries the entry instead
    /// of leaving it stranded.
    pub fn release_claim(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE activity_log SET status = 'scheduled'
             WHERE id = ?1 AND status = 'processing'",
            [id],
        )?;
        Ok(n == 1)
    }

    /// Re-queue every `processing` row back to `scheduled`. Run at engine
    /// start: a fresh process has no in-flight executions, so any
    /// `processing` row is a leftover from a crash mid-pass and would
    /// otherwise never be polled again.
    pub fn requeue_processing(&self) -> Result<usize> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE activity_log SET status = 'scheduled' WHERE status = 'processing'",
            [],
        )?;
        Ok(n)
    }

    /// Terminal transition: set status, `executed_at`, duration, and merge
    /// `details_patch` into the stored details — one atomic update.
    ///
    /// Refuses rows that are missing or already terminal and returns `None`,
    /// so a second call for the same entry can never overwrite the first.
    pub fn mark_executed(
        &self,
        id: &str,
        status: ActivityStatus,
        duration_ms: Option<i64>,
        details_patch: Option<&serde_json::Value>,
    ) -> Result<Option<ActivityLog>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let row: Option<(String, String)> = tx
            .query_row(
                "SELECT status, details FROM activity_log WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((current, details_str)) = row else {
            return Ok(None);
        };
        if ActivityStatus::parse(&current).is_terminal() {
            return Ok(None);
        }

        let mut details = parse_json(details_str);
        if let Some(patch) = details_patch {
            merge_details(&mut details, patch);
        }

        tx.execute(
            "UPDATE activity_log
             SET status = ?1, executed_at = ?2, execution_duration_ms = ?3, details = ?4
             WHERE id = ?5 AND status IN ('scheduled', 'processing')",
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                duration_ms,
                details.to_string(),
                id,
            ],
        )?;
        tx.commit()?;

        let conn = &*conn;
        Ok(log_row(conn, id)?)
    }
}

const RULE_SELECT: &str = "SELECT id, name, trigger_id, action_id, action_type, \
     schedule_delay_mins, action_details, is_active, last_triggered, created_at FROM rules";

const LOG_SELECT: &str = "SELECT id, rule_id, status, triggered_at, schedule_time, \
     executed_at, execution_duration_ms, details FROM activity_log";

fn rule_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<Rule>> {
    conn.query_row(&format!("{RULE_SELECT} WHERE id = ?1"), [id], map_rule)
        .optional()
}

fn map_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        name: row.get(1)?,
        trigger_id: row.get(2)?,
        action_id: row.get(3)?,
        action_type: ActionType::parse(&row.get::<_, String>(4)?),
        schedule_delay_mins: row.get(5)?,
        action_details: parse_json(row.get::<_, String>(6)?),
        is_active: row.get::<_, i32>(7)? != 0,
        last_triggered: row.get::<_, Option<String>>(8)?.as_deref().and_then(parse_ts_opt),
        created_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

fn log_row(conn: &Connection, id: &str) -> rusqlite::Result<Option<ActivityLog>> {
    conn.query_row(&format!("{LOG_SELECT} WHERE id = ?1"), [id], map_log)
        .optional()
}

fn map_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityLog> {
    Ok(ActivityLog {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        status: ActivityStatus::parse(&row.get::<_, String>(2)?),
        triggered_at: parse_ts(&row.get::<_, String>(3)?),
        schedule_time: row.get::<_, Option<String>>(4)?.as_deref().and_then(parse_ts_opt),
        executed_at: row.get::<_, Option<String>>(5)?.as_deref().and_then(parse_ts_opt),
        execution_duration_ms: row.get(6)?,
        details: parse_json(row.get::<_, String>(7)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn parse_json(s: String) -> serde_json::Value {
    serde_json::from_str(&s).unwrap_or_default()
}

/// Shallow-merge `patch` into `base`. Non-object operands: patch wins.
fn merge_details(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base_map), Some(patch_map)) => {
            for (k, v) in patch_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_db(name: &str) -> (std::path::PathBuf, SchedulerDb) {
        let dir = std::env::temp_dir().join(name);
        std::fs::create_dir_all(&dir).ok();
        let db = SchedulerDb::open(&dir.join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_and_migrate() {
        let (dir, db) = temp_db("ruleflow-db-migrate");
        assert!(db.list_rules().unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rule_roundtrip() {
        let (dir, db) = temp_db("ruleflow-db-rule");
        let rule = Rule::scheduled("remind", "trig-1", "act-1", 5, json!({"to": "ops"}));
        db.save_rule(&rule).unwrap();

        let loaded = db.get_rule(&rule.id).unwrap().unwrap();
        assert_eq!(loaded.name, "remind");
        assert_eq!(loaded.action_type, ActionType::Scheduled);
        assert_eq!(loaded.schedule_delay_mins, 5);
        assert_eq!(loaded.action_details, json!({"to": "ops"}));
        assert!(loaded.is_active);
        assert!(loaded.last_triggered.is_none());

        assert!(db.set_rule_active(&rule.id, false).unwrap());
        assert!(!db.get_rule(&rule.id).unwrap().unwrap().is_active);

        assert!(db.delete_rule(&rule.id).unwrap());
        assert!(db.get_rule(&rule.id).unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_update_last_triggered() {
        let (dir, db) = temp_db("ruleflow-db-last-triggered");
        let rule = Rule::immediate("ping", "trig-1", "act-1", json!({}));
        db.save_rule(&rule).unwrap();

        let updated = db.update_rule_last_triggered(&rule.id).unwrap().unwrap();
        assert!(updated.last_triggered.is_some());

        assert!(db.update_rule_last_triggered("rule-missing").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pending_excludes_future_entries() {
        let (dir, db) = temp_db("ruleflow-db-pending");
        let due = ActivityLog::scheduled("rule-1", 0, json!({}));
        let mut future = ActivityLog::scheduled("rule-1", 0, json!({}));
        future.schedule_time = Some(Utc::now() + chrono::Duration::minutes(10));
        db.create_activity_log(&due).unwrap();
        db.create_activity_log(&future).unwrap();

        let pending = db.pending_scheduled(Utc::now()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, due.id);

        // Repeated polls before due time keep excluding the future entry.
        let pending = db.pending_scheduled(Utc::now()).unwrap();
        assert_eq!(pending.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_claim_wins_once() {
        let (dir, db) = temp_db("ruleflow-db-claim");
        let entry = ActivityLog::scheduled("rule-1", 0, json!({}));
        db.create_activity_log(&entry).unwrap();

        assert!(db.claim(&entry.id).unwrap());
        assert!(!db.claim(&entry.id).unwrap()); // second pass loses the race

        let loaded = db.get_activity_log(&entry.id).unwrap().unwrap();
        assert_eq!(loaded.status, ActivityStatus::Processing);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_release_and_requeue_processing() {
        let (dir, db) = temp_db("ruleflow-db-release");
        let entry = ActivityLog::scheduled("rule-1", 0, json!({}));
        db.create_activity_log(&entry).unwrap();
        db.claim(&entry.id).unwrap();

        assert!(db.release_claim(&entry.id).unwrap());
        let loaded = db.get_activity_log(&entry.id).unwrap().unwrap();
        assert_eq!(loaded.status, ActivityStatus::Scheduled);
        assert!(!db.release_claim(&entry.id).unwrap()); // already released

        db.claim(&entry.id).unwrap();
        assert_eq!(db.requeue_processing().unwrap(), 1);
        assert_eq!(db.pending_scheduled(Utc::now()).unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mark_executed_is_single_shot() {
        let (dir, db) = temp_db("ruleflow-db-mark");
        let entry = ActivityLog::scheduled("rule-1", 0, json!({"input": "x"}));
        db.create_activity_log(&entry).unwrap();
        db.claim(&entry.id).unwrap();

        let done = db
            .mark_executed(&entry.id, ActivityStatus::Success, Some(42), Some(&json!({"out": 1})))
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ActivityStatus::Success);
        assert_eq!(done.execution_duration_ms, Some(42));
        assert!(done.executed_at.is_some());
        // Patch merged on top of the original details.
        assert_eq!(done.details, json!({"input": "x", "out": 1}));

        // Second terminal transition is suppressed.
        let again = db
            .mark_executed(&entry.id, ActivityStatus::Failed, None, Some(&json!({"error": "no"})))
            .unwrap();
        assert!(again.is_none());
        let loaded = db.get_activity_log(&entry.id).unwrap().unwrap();
        assert_eq!(loaded.status, ActivityStatus::Success);
        assert_eq!(loaded.details, json!({"input": "x", "out": 1}));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mark_executed_missing_row() {
        let (dir, db) = temp_db("ruleflow-db-mark-missing");
        assert!(db
            .mark_executed("log-none", ActivityStatus::Failed, None, None)
            .unwrap()
            .is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_get_by_status_and_rule() {
        let (dir, db) = temp_db("ruleflow-db-queries");
        let a = ActivityLog::scheduled("rule-1", 0, json!({}));
        let b = ActivityLog::executed("rule-1", ActivityStatus::Success, 5, json!({}));
        let c = ActivityLog::scheduled("rule-2", 0, json!({}));
        for e in [&a, &b, &c] {
            db.create_activity_log(e).unwrap();
        }

        let scheduled = db.get_by_status(ActivityStatus::Scheduled).unwrap();
        assert_eq!(scheduled.len(), 2);
        let success = db.get_by_status(ActivityStatus::Success).unwrap();
        assert_eq!(success.len(), 1);
        assert_eq!(db.logs_for_rule("rule-1").unwrap().len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}

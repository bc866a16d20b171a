use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// The DB broker is the single path to `grid.db`.
///
/// Calls are serialized in-process and every call appends one audit event, so the
/// audit log doubles as the operation log of the store.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

static DB_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join(AUDIT_LOG_NAME),
        }
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::GridError>
    where
        F: FnOnce(&Connection) -> Result<R, error::GridError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let conn = db::db_connect(&db_path.to_string_lossy())?;
        let result = f(&conn);

        self.log_event(actor, intent_ref, op_name, &db_id(db_path), status_of(&result))?;
        result
    }

    /// Same as [`DbBroker::with_conn`], but `f` runs inside a transaction that only
    /// commits when `f` returns `Ok` and its audit event was written.
    pub fn with_tx<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::GridError>
    where
        F: FnOnce(&Connection) -> Result<R, error::GridError>,
    {
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut conn = db::db_connect(&db_path.to_string_lossy())?;
        let db_id = db_id(db_path);
        let tx = conn.transaction()?;
        let value = match f(&tx) {
            Ok(value) => value,
            Err(e) => {
                drop(tx);
                self.log_event(actor, intent_ref, op_name, &db_id, "error")?;
                return Err(e);
            }
        };

        // The success event is written before commit; a failed audit write rolls back.
        self.log_event(actor, intent_ref, op_name, &db_id, "success")?;
        if let Err(e) = tx.commit() {
            self.log_event(actor, intent_ref, op_name, &db_id, "error")?;
            return Err(e.into());
        }
        Ok(value)
    }

    fn log_event(
        &self,
        actor: &str,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::GridError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    /// Last `limit` events, oldest first. Malformed lines are skipped.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<BrokerEvent>, error::GridError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.audit_log_path)?;
        let events: Vec<BrokerEvent> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = events.len().saturating_sub(limit);
        Ok(events.into_iter().skip(skip).collect())
    }
}

fn db_id(db_path: &Path) -> String {
    db_path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

fn status_of<R>(result: &Result<R, error::GridError>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Serialized access to grid.db with a per-call audit log",
        "commands": [
            { "name": "audit", "description": "Show the mutation audit log" }
        ],
        "storage": [AUDIT_LOG_NAME]
    })
}

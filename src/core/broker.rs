use crate::core::db;
use crate::core::error::MaiaError;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Every SQLite access goes through the broker so each operation leaves a
/// tracing event and an audit line behind.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(store: &Store) -> Self {
        Self {
            audit_log_path: store.audit_log_path(),
        }
    }

    /// Execute a closure with a fresh connection to the specified DB.
    pub fn with_conn<F, R>(&self, db_path: &Path, op_name: &str, f: F) -> Result<R, MaiaError>
    where
        F: FnOnce(&Connection) -> Result<R, MaiaError>,
    {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let result = db::db_connect(db_path).and_then(|conn| f(&conn));

        let status = if result.is_ok() { "success" } else { "error" };
        debug!(op = op_name, db = db_id.as_str(), status, "brokered db op");
        self.log_event(op_name, &db_id, status);

        result
    }

    /// Read-only variant with a caller-chosen busy timeout. A database that
    /// does not exist yet is reported without an audit line.
    pub fn with_read_conn<F, R>(
        &self,
        db_path: &Path,
        op_name: &str,
        busy: Duration,
        f: F,
    ) -> Result<R, MaiaError>
    where
        F: FnOnce(&Connection) -> Result<R, MaiaError>,
    {
        let conn = match db::db_connect_read_only(db_path, busy) {
            Err(e @ MaiaError::StorageUnavailable(_)) => return Err(e),
            other => other,
        };
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let result = conn.and_then(|conn| f(&conn));

        let status = if result.is_ok() { "success" } else { "error" };
        debug!(op = op_name, db = db_id.as_str(), status, "brokered db read");
        self.log_event(op_name, &db_id, status);

        result
    }

    /// Audit lines are best effort; a failed write never fails the operation.
    fn log_event(&self, op: &str, db_id: &str, status: &str) {
        let ev = BrokerEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let written = serde_json::to_string(&ev)
            .map_err(MaiaError::from)
            .and_then(|line| {
                let mut f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.audit_log_path)?;
                writeln!(f, "{}", line)?;
                Ok(())
            });
        if let Err(e) = written {
            warn!(error = %e, path = %self.audit_log_path.display(), "audit log write failed");
        }
    }

    pub fn read_events(&self) -> Vec<BrokerEvent> {
        std::fs::read_to_string(&self.audit_log_path)
            .unwrap_or_default()
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

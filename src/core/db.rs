use crate::core::broker::DbBroker;
use crate::core::error::MaiaError;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::{Connection, OpenFlags};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &Path) -> Result<Connection, MaiaError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Read-only connection with a short busy timeout. Used by the context
/// loader, which must degrade instead of waiting on a locked database.
pub fn db_connect_read_only(db_path: &Path, busy: Duration) -> Result<Connection, MaiaError> {
    if !db_path.exists() {
        return Err(MaiaError::StorageUnavailable(format!(
            "{} does not exist",
            db_path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy)?;
    Ok(conn)
}

pub fn initialize_routing_db(store: &Store) -> Result<(), MaiaError> {
    fs::create_dir_all(store.data_dir())?;
    let broker = DbBroker::new(store);
    broker.with_conn(&store.routing_db_path(), "routing.init", |conn| {
        conn.execute_batch(schemas::ROUTING_DB_SCHEMA_SUGGESTIONS)?;
        conn.execute_batch(schemas::ROUTING_DB_SCHEMA_METRICS)?;
        conn.execute_batch(schemas::ROUTING_DB_SCHEMA_OVERRIDES)?;
        conn.execute_batch(schemas::ROUTING_DB_INDEX_HASH)?;
        conn.execute_batch(schemas::ROUTING_DB_INDEX_TIMESTAMP)?;
        conn.execute_batch(schemas::ROUTING_DB_INDEX_ACCEPTED)?;
        conn.execute_batch(schemas::ROUTING_DB_INDEX_CATEGORY)?;
        Ok(())
    })
}

pub fn initialize_system_state_db(store: &Store) -> Result<(), MaiaError> {
    fs::create_dir_all(store.data_dir())?;
    let broker = DbBroker::new(store);
    broker.with_conn(&store.system_state_db_path(), "system_state.init", |conn| {
        conn.execute_batch(schemas::SYSTEM_STATE_DB_SCHEMA_PHASES)?;
        Ok(())
    })
}

use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &str) -> Result<Connection, error::GridError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn grid_db_path(root: &Path) -> PathBuf {
    root.join(schemas::GRID_DB_NAME)
}

/// Creates the store directory and every table. Idempotent.
pub fn initialize_grid_db(root: &Path) -> Result<(), error::GridError> {
    fs::create_dir_all(root)?;
    let db_path = grid_db_path(root);

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "gridbase", None, "grid.init", |conn| {
        for stmt in schemas::GRID_DB_SCHEMA {
            conn.execute(stmt, [])?;
        }
        Ok(())
    })
}

/// Shorthand used by every plugin: open a brokered connection to `grid.db`.
pub fn with_grid<F, R>(store: &Store, actor: &str, op: &str, f: F) -> Result<R, error::GridError>
where
    F: FnOnce(&Connection) -> Result<R, error::GridError>,
{
    DbBroker::new(&store.root).with_conn(&grid_db_path(&store.root), actor, None, op, f)
}

/// Like [`with_grid`] but runs `f` inside one transaction; any error rolls back.
pub fn with_grid_tx<F, R>(store: &Store, actor: &str, op: &str, f: F) -> Result<R, error::GridError>
where
    F: FnOnce(&Connection) -> Result<R, error::GridError>,
{
    DbBroker::new(&store.root).with_tx(&grid_db_path(&store.root), actor, None, op, f)
}

//! Dense `order_index` maintenance for sibling rows.
//!
//! Tables within a base and fields within a table are displayed by `order_index`.
//! Indices are assigned and rewritten inside the caller's transaction so the
//! sibling set always reads `{0..n-1}`, with no gaps or duplicates, after any
//! append, move or delete.

use crate::core::error::GridError;
use rusqlite::{Connection, params};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderScope {
    /// `grid_tables` grouped by `base_id`.
    Tables,
    /// `fields` grouped by `table_id`.
    Fields,
}

impl OrderScope {
    fn table(self) -> &'static str {
        match self {
            OrderScope::Tables => "grid_tables",
            OrderScope::Fields => "fields",
        }
    }

    fn parent_column(self) -> &'static str {
        match self {
            OrderScope::Tables => "base_id",
            OrderScope::Fields => "table_id",
        }
    }
}

/// Index for a new last sibling. Must run in the same transaction as the insert.
pub fn next_index(conn: &Connection, scope: OrderScope, parent_id: &str) -> Result<i64, GridError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?1",
        scope.table(),
        scope.parent_column()
    );
    Ok(conn.query_row(&sql, params![parent_id], |row| row.get(0))?)
}

/// Sibling ids in display order.
pub fn ordered_ids(
    conn: &Connection,
    scope: OrderScope,
    parent_id: &str,
) -> Result<Vec<String>, GridError> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?1 ORDER BY order_index, created_at, rowid",
        scope.table(),
        scope.parent_column()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![parent_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn write_order(conn: &Connection, scope: OrderScope, ids: &[String]) -> Result<(), GridError> {
    let sql = format!("UPDATE {} SET order_index = ?1 WHERE id = ?2", scope.table());
    let mut stmt = conn.prepare(&sql)?;
    for (index, id) in ids.iter().enumerate() {
        stmt.execute(params![index as i64, id])?;
    }
    Ok(())
}

/// Close gaps left by a delete: rewrite siblings to `{0..n-1}` keeping their order.
pub fn reindex(conn: &Connection, scope: OrderScope, parent_id: &str) -> Result<(), GridError> {
    let ids = ordered_ids(conn, scope, parent_id)?;
    write_order(conn, scope, &ids)
}

/// Move `id` to `new_index` (clamped to the last position); siblings shift.
/// Returns the index the row ended up at.
pub fn move_to(
    conn: &Connection,
    scope: OrderScope,
    parent_id: &str,
    id: &str,
    new_index: usize,
) -> Result<usize, GridError> {
    let ids = ordered_ids(conn, scope, parent_id)?;
    let (reordered, landed) =
        reorder(ids, id, new_index).ok_or_else(|| GridError::not_found(scope.table(), id))?;
    write_order(conn, scope, &reordered)?;
    Ok(landed)
}

/// Pure part of [`move_to`]. `None` when `id` is not among `ids`.
fn reorder(mut ids: Vec<String>, id: &str, new_index: usize) -> Option<(Vec<String>, usize)> {
    let from = ids.iter().position(|x| x == id)?;
    let moved = ids.remove(from);
    let to = new_index.min(ids.len());
    ids.insert(to, moved);
    Some((ids, to))
}

/// True when `indices` is exactly `{0..n-1}` in some order.
pub fn is_dense(indices: &[i64]) -> bool {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(i, v)| *v == i as i64)
}

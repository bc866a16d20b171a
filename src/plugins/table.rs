use crate::core::cell::{FieldOptions, FieldType};
use crate::core::db;
use crate::core::error::GridError;
use crate::core::ordering::{self, OrderScope};
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::base::owned_base_on;
use crate::plugins::field::{self, Field, NewField};
use crate::plugins::workspace::clean_name;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Name of the field every new table starts with.
pub const PRIMARY_FIELD_NAME: &str = "Name";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Table {
    pub id: String,
    pub base_id: String,
    pub name: String,
    pub order_index: i64,
    pub created_at: String,
}

const TABLE_COLUMNS: &str = "t.id, t.base_id, t.name, t.order_index, t.created_at";

fn table_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Table> {
    Ok(Table {
        id: row.get(0)?,
        base_id: row.get(1)?,
        name: row.get(2)?,
        order_index: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Fetch a table whose base lives in a workspace the user owns.
pub(crate) fn owned_table_on(conn: &Connection, user_id: &str, table_id: &str) -> Result<Table, GridError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM grid_tables t
             JOIN bases b ON t.base_id = b.id
             JOIN workspaces w ON b.workspace_id = w.id
             WHERE t.id = ?1 AND w.owner = ?2",
            TABLE_COLUMNS
        ),
        params![table_id, user_id],
        table_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("table", table_id))
}

/// Insert a table at the end of its base plus its primary "Name" field.
/// Runs on the caller's transaction; shared with blueprint installs.
pub(crate) fn insert_table_on(
    conn: &Connection,
    base_id: &str,
    name: &str,
) -> Result<(Table, Field), GridError> {
    let table = Table {
        id: time::new_id(),
        base_id: base_id.to_string(),
        name: clean_name("table", name)?,
        order_index: ordering::next_index(conn, OrderScope::Tables, base_id)?,
        created_at: time::now_epoch_z(),
    };
    conn.execute(
        "INSERT INTO grid_tables(id, base_id, name, order_index, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![table.id, table.base_id, table.name, table.order_index, table.created_at],
    )?;
    let primary = field::insert_field_on(
        conn,
        &table.id,
        &NewField {
            name: PRIMARY_FIELD_NAME.to_string(),
            field_type: FieldType::Text,
            options: FieldOptions::default(),
            required: true,
        },
    )?;
    Ok((table, primary))
}

/// Create a table and its primary field in one transaction: both rows exist or neither.
pub fn create_table(
    store: &Store,
    session: &Session,
    base_id: &str,
    name: &str,
) -> Result<(Table, Field), GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "table.create", |conn| {
        owned_base_on(conn, user_id, base_id)?;
        insert_table_on(conn, base_id, name)
    })
}

pub fn list_tables(store: &Store, session: &Session, base_id: &str) -> Result<Vec<Table>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "table.list", |conn| {
        owned_base_on(conn, user_id, base_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM grid_tables t WHERE t.base_id = ?1 ORDER BY t.order_index, t.created_at, t.rowid",
            TABLE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![base_id], table_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn get_table(store: &Store, session: &Session, table_id: &str) -> Result<Table, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "table.get", |conn| owned_table_on(conn, user_id, table_id))
}

pub fn rename_table(
    store: &Store,
    session: &Session,
    table_id: &str,
    name: &str,
) -> Result<Table, GridError> {
    let user_id = session.require_active()?;
    let name = clean_name("table", name)?;
    db::with_grid_tx(store, user_id, "table.rename", |conn| {
        let mut table = owned_table_on(conn, user_id, table_id)?;
        conn.execute(
            "UPDATE grid_tables SET name = ?1 WHERE id = ?2",
            params![name, table_id],
        )?;
        table.name = name;
        Ok(table)
    })
}

/// Move a table to `new_index` among its siblings (clamped to the end).
pub fn move_table(
    store: &Store,
    session: &Session,
    table_id: &str,
    new_index: usize,
) -> Result<Table, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "table.move", |conn| {
        let mut table = owned_table_on(conn, user_id, table_id)?;
        let landed = ordering::move_to(conn, OrderScope::Tables, &table.base_id, table_id, new_index)?;
        table.order_index = landed as i64;
        Ok(table)
    })
}

/// Delete a table with its fields and records; sibling tables are reindexed.
pub fn delete_table(store: &Store, session: &Session, table_id: &str) -> Result<(), GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "table.delete", |conn| {
        let table = owned_table_on(conn, user_id, table_id)?;
        conn.execute("DELETE FROM grid_tables WHERE id = ?1", params![table_id])?;
        ordering::reindex(conn, OrderScope::Tables, &table.base_id)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "table", about = "Manage tables within a base")]
pub struct TableCli {
    #[clap(subcommand)]
    pub command: TableCommand,
}

#[derive(Subcommand, Debug)]
pub enum TableCommand {
    /// Create a table (starts with a required "Name" text field).
    Create {
        #[clap(long)]
        base: String,
        #[clap(value_name = "NAME")]
        name: String,
    },
    /// List tables of a base in display order.
    List {
        #[clap(long)]
        base: String,
    },
    /// Rename a table.
    Rename {
        #[clap(long)]
        id: String,
        #[clap(long)]
        name: String,
    },
    /// Move a table to a new position.
    Move {
        #[clap(long)]
        id: String,
        #[clap(long)]
        to: usize,
    },
    /// Delete a table with its fields and records.
    Delete {
        #[clap(long)]
        id: String,
        #[clap(long)]
        yes: bool,
    },
}

pub fn run_table_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: TableCli,
) -> Result<(), GridError> {
    match cli.command {
        TableCommand::Create { base, name } => {
            let (table, primary) = create_table(store, session, &base, &name)?;
            let payload = serde_json::json!({ "table": table, "primary_field": primary });
            output::emit(format, "table.create", payload, || {
                format!(
                    "Created table {} ({}) with primary field {} ({})",
                    table.name, table.id, primary.name, primary.id
                )
            });
        }
        TableCommand::List { base } => {
            let tables = list_tables(store, session, &base)?;
            output::emit(format, "table.list", serde_json::to_value(&tables)?, || {
                tables
                    .iter()
                    .map(|t| format!("{:>3}. {}  {}", t.order_index, t.id, t.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        TableCommand::Rename { id, name } => {
            let table = rename_table(store, session, &id, &name)?;
            output::emit(format, "table.rename", serde_json::to_value(&table)?, || {
                format!("Renamed table {} to {}", table.id, table.name)
            });
        }
        TableCommand::Move { id, to } => {
            let table = move_table(store, session, &id, to)?;
            output::emit(format, "table.move", serde_json::to_value(&table)?, || {
                format!("Moved table {} to position {}", table.name, table.order_index)
            });
        }
        TableCommand::Delete { id, yes } => {
            crate::require_confirmation(yes, "table delete")?;
            delete_table(store, session, &id)?;
            output::emit(format, "table.delete", serde_json::json!({ "id": id }), || {
                format!("Deleted table {}", id)
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "table",
        "version": "0.1.0",
        "description": "Ordered sheets within a base; order_index is kept dense per base",
        "commands": [
            { "name": "create", "parameters": ["base", "name"] },
            { "name": "list", "parameters": ["base"] },
            { "name": "rename", "parameters": ["id", "name"] },
            { "name": "move", "parameters": ["id", "to"] },
            { "name": "delete", "parameters": ["id", "yes"] }
        ],
        "storage": ["grid.db:grid_tables"]
    })
}

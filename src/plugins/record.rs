use crate::core::cell::{self, CellValue};
use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::field::{self, Field, owned_field_on};
use crate::plugins::table::owned_table_on;
use crate::plugins::usage;
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record payload: field id → value. Ordered so the stored JSON is stable.
pub type CellMap = BTreeMap<String, CellValue>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub table_id: String,
    pub data: CellMap,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Record {
    /// Value of `field`, reading a missing key (field added later) as its empty value.
    pub fn cell(&self, field: &Field) -> CellValue {
        self.data
            .get(&field.id)
            .cloned()
            .unwrap_or_else(|| field.field_type.default_value())
    }

    /// Cells in field order; keys of deleted fields are not shown.
    pub fn visible_cells(&self, fields: &[Field]) -> Vec<(String, CellValue)> {
        fields
            .iter()
            .map(|f| (f.id.clone(), self.cell(f)))
            .collect()
    }

    /// Keys left behind by deleted fields (retained as hidden legacy values).
    pub fn orphaned_keys(&self, fields: &[Field]) -> Vec<String> {
        let live: FxHashSet<&str> = fields.iter().map(|f| f.id.as_str()).collect();
        self.data
            .keys()
            .filter(|k| !live.contains(k.as_str()))
            .cloned()
            .collect()
    }

    /// Required fields whose value is empty.
    pub fn missing_required<'a>(&self, fields: &'a [Field]) -> Vec<&'a Field> {
        fields
            .iter()
            .filter(|f| f.required && self.cell(f).is_empty())
            .collect()
    }
}

/// Data map for a new record: one default value per field, by type.
pub fn initial_data(fields: &[Field]) -> CellMap {
    fields
        .iter()
        .map(|f| (f.id.clone(), f.field_type.default_value()))
        .collect()
}

const RECORD_COLUMNS: &str = "r.id, r.table_id, r.data, r.created_by, r.created_at, r.updated_at";

fn parse_data(column: usize, raw: &str) -> rusqlite::Result<CellMap> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let raw: String = row.get(2)?;
    Ok(Record {
        id: row.get(0)?,
        table_id: row.get(1)?,
        data: parse_data(2, &raw)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn data_of_table_on(conn: &Connection, table_id: &str) -> Result<Vec<(String, CellMap)>, GridError> {
    let mut stmt = conn.prepare("SELECT id, data FROM records WHERE table_id = ?1")?;
    let rows = stmt.query_map(params![table_id], |row| {
        let raw: String = row.get(1)?;
        Ok((row.get::<_, String>(0)?, parse_data(1, &raw)?))
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Whole-map replace of a record's data.
pub(crate) fn write_data_on(conn: &Connection, record_id: &str, data: &CellMap) -> Result<(), GridError> {
    conn.execute(
        "UPDATE records SET data = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(data)?, time::now_epoch_z(), record_id],
    )?;
    Ok(())
}

pub(crate) fn insert_record_on(
    conn: &Connection,
    table_id: &str,
    data: CellMap,
    created_by: &str,
) -> Result<Record, GridError> {
    let now = time::now_epoch_z();
    let record = Record {
        id: time::new_id(),
        table_id: table_id.to_string(),
        data,
        created_by: created_by.to_string(),
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO records(id, table_id, data, created_by, created_at, updated_at) VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.table_id,
            serde_json::to_string(&record.data)?,
            record.created_by,
            record.created_at,
            record.updated_at
        ],
    )?;
    Ok(record)
}

fn owned_record_on(conn: &Connection, user_id: &str, record_id: &str) -> Result<Record, GridError> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM records r WHERE r.id = ?1", RECORD_COLUMNS),
            params![record_id],
            record_from_row,
        )
        .optional()?
        .ok_or_else(|| GridError::not_found("record", record_id))?;
    owned_table_on(conn, user_id, &record.table_id)
        .map_err(|_| GridError::not_found("record", record_id))?;
    Ok(record)
}

/// Add a record with one default value per current field
/// (checkbox → false, number → 0, everything else → empty).
pub fn create_record(store: &Store, session: &Session, table_id: &str) -> Result<Record, GridError> {
    let user_id = session.require_active()?;
    let config = config::load_config(&store.root)?;
    db::with_grid_tx(store, user_id, "record.create", |conn| {
        let table = owned_table_on(conn, user_id, table_id)?;
        usage::ensure_record_capacity_on(conn, &config.default_plan, &table.base_id)?;
        let fields = field::fields_of_table_on(conn, table_id)?;
        insert_record_on(conn, table_id, initial_data(&fields), user_id)
    })
}

pub fn get_record(store: &Store, session: &Session, record_id: &str) -> Result<Record, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "record.get", |conn| owned_record_on(conn, user_id, record_id))
}

/// Records of a table in creation order.
pub fn list_records(store: &Store, session: &Session, table_id: &str) -> Result<Vec<Record>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "record.list", |conn| {
        owned_table_on(conn, user_id, table_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records r WHERE r.table_id = ?1 ORDER BY r.created_at, r.rowid",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![table_id], record_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

/// Shared read-modify-write for cell updates; `make` turns the field into the new value.
fn update_cell<F>(
    store: &Store,
    session: &Session,
    op: &str,
    record_id: &str,
    field_id: &str,
    make: F,
) -> Result<Record, GridError>
where
    F: FnOnce(&Field) -> Result<CellValue, GridError>,
{
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, op, |conn| {
        let mut record = owned_record_on(conn, user_id, record_id)?;
        let field = owned_field_on(conn, user_id, field_id)?;
        if field.table_id != record.table_id {
            return Err(GridError::validation(format!(
                "field '{}' does not belong to the record's table",
                field_id
            )));
        }
        let value = make(&field)?;
        record.data.insert(field.id.clone(), value);
        write_data_on(conn, &record.id, &record.data)?;
        Ok(record)
    })
}

/// Apply text typed into a cell: coerce to the field's type, validate, then write
/// the record's whole data map back. Invalid input changes nothing.
pub fn edit_cell(
    store: &Store,
    session: &Session,
    record_id: &str,
    field_id: &str,
    input: &str,
) -> Result<Record, GridError> {
    update_cell(store, session, "record.edit_cell", record_id, field_id, |field| {
        cell::parse_input(field.field_type, &field.options, input)
    })
}

/// Typed variant of [`edit_cell`]; the value's variant must match the field type.
pub fn set_cell(
    store: &Store,
    session: &Session,
    record_id: &str,
    field_id: &str,
    value: CellValue,
) -> Result<Record, GridError> {
    update_cell(store, session, "record.set_cell", record_id, field_id, |field| {
        cell::validate(field.field_type, &field.options, &value)?;
        Ok(value)
    })
}

pub fn delete_record(store: &Store, session: &Session, record_id: &str) -> Result<(), GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "record.delete", |conn| {
        owned_record_on(conn, user_id, record_id)?;
        conn.execute("DELETE FROM records WHERE id = ?1", params![record_id])?;
        Ok(())
    })
}

#[derive(Parser, Debug)]
#[clap(name = "record", about = "Add, edit and remove records (rows)")]
pub struct RecordCli {
    #[clap(subcommand)]
    pub command: RecordCommand,
}

#[derive(Subcommand, Debug)]
pub enum RecordCommand {
    /// Add a record with default values.
    Add {
        #[clap(long)]
        table: String,
    },
    /// Show the records of a table as a grid.
    List {
        #[clap(long)]
        table: String,
    },
    /// Set one cell from text input.
    Edit {
        #[clap(long)]
        id: String,
        #[clap(long)]
        field: String,
        #[clap(long)]
        value: String,
    },
    /// Delete a record.
    Delete {
        #[clap(long)]
        id: String,
        #[clap(long)]
        yes: bool,
    },
}

const MAX_CELL_CHARS: usize = 32;

pub fn run_record_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: RecordCli,
) -> Result<(), GridError> {
    match cli.command {
        RecordCommand::Add { table } => {
            let record = create_record(store, session, &table)?;
            output::emit(format, "record.add", serde_json::to_value(&record)?, || {
                format!("Added record {}", record.id)
            });
        }
        RecordCommand::List { table } => {
            let fields = field::list_fields(store, session, &table)?;
            let records = list_records(store, session, &table)?;
            output::emit(format, "record.list", serde_json::to_value(&records)?, || {
                let headers: Vec<String> = std::iter::once("id".to_string())
                    .chain(fields.iter().map(|f| f.name.clone()))
                    .collect();
                let rows: Vec<Vec<String>> = records
                    .iter()
                    .map(|r| {
                        std::iter::once(r.id.clone())
                            .chain(r.visible_cells(&fields).into_iter().map(|(_, v)| v.to_string()))
                            .collect()
                    })
                    .collect();
                output::render_grid(&headers, &rows, MAX_CELL_CHARS)
            });
        }
        RecordCommand::Edit { id, field, value } => {
            let record = edit_cell(store, session, &id, &field, &value)?;
            let shown = record.data.get(&field).map(|v| v.to_string()).unwrap_or_default();
            let fields = field::list_fields(store, session, &record.table_id)?;
            let missing: Vec<&str> = record
                .missing_required(&fields)
                .into_iter()
                .map(|f| f.name.as_str())
                .collect();
            output::emit(format, "record.edit", serde_json::to_value(&record)?, || {
                let mut line = format!("Record {}: {} = {}", record.id, field, shown);
                if !missing.is_empty() {
                    line.push_str(&format!(" (required still empty: {})", missing.join(", ")));
                }
                line
            });
        }
        RecordCommand::Delete { id, yes } => {
            crate::require_confirmation(yes, "record delete")?;
            delete_record(store, session, &id)?;
            output::emit(format, "record.delete", serde_json::json!({ "id": id }), || {
                format!("Deleted record {}", id)
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "record",
        "version": "0.1.0",
        "description": "Rows keyed by field id; cells are typed and validated on write",
        "commands": [
            { "name": "add", "parameters": ["table"] },
            { "name": "list", "parameters": ["table"] },
            { "name": "edit", "parameters": ["id", "field", "value"] },
            { "name": "delete", "parameters": ["id", "yes"] }
        ],
        "storage": ["grid.db:records"]
    })
}

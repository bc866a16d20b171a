use crate::core::cell::{FieldOptions, FieldType};
use crate::core::config::{self, OrphanPolicy};
use crate::core::db;
use crate::core::error::GridError;
use crate::core::ordering::{self, OrderScope};
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::record::{self, CellMap};
use crate::plugins::table::owned_table_on;
use crate::plugins::workspace::clean_name;
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub table_id: String,
    pub name: String,
    pub field_type: FieldType,
    pub options: FieldOptions,
    pub order_index: i64,
    pub required: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewField {
    pub name: String,
    pub field_type: FieldType,
    pub options: FieldOptions,
    pub required: bool,
}

impl NewField {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            options: FieldOptions::default(),
            required: false,
        }
    }

    pub fn with_options(mut self, options: FieldOptions) -> Self {
        self.options = options;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

const FIELD_COLUMNS: &str =
    "f.id, f.table_id, f.name, f.field_type, f.options, f.order_index, f.required, f.created_at";

fn conversion_error(column: usize, e: GridError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn field_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Field> {
    let field_type: String = row.get(3)?;
    let options: String = row.get(4)?;
    Ok(Field {
        id: row.get(0)?,
        table_id: row.get(1)?,
        name: row.get(2)?,
        field_type: field_type.parse().map_err(|e| conversion_error(3, e))?,
        options: serde_json::from_str(&options)
            .map_err(|e| conversion_error(4, GridError::JsonError(e)))?,
        order_index: row.get(5)?,
        required: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Options only carry meaning for select types; everything else stores `{}`.
fn options_for(field_type: FieldType, options: &FieldOptions) -> FieldOptions {
    if field_type.has_choices() {
        options.clone().normalized()
    } else {
        FieldOptions::default()
    }
}

/// Append a field to `table_id` at `order_index = current field count`.
pub(crate) fn insert_field_on(
    conn: &Connection,
    table_id: &str,
    new: &NewField,
) -> Result<Field, GridError> {
    let field = Field {
        id: time::new_id(),
        table_id: table_id.to_string(),
        name: clean_name("field", &new.name)?,
        field_type: new.field_type,
        options: options_for(new.field_type, &new.options),
        order_index: ordering::next_index(conn, OrderScope::Fields, table_id)?,
        required: new.required,
        created_at: time::now_epoch_z(),
    };
    conn.execute(
        "INSERT INTO fields(id, table_id, name, field_type, options, order_index, required, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            field.id,
            field.table_id,
            field.name,
            field.field_type.as_str(),
            serde_json::to_string(&field.options)?,
            field.order_index,
            field.required,
            field.created_at
        ],
    )?;
    Ok(field)
}

pub(crate) fn fields_of_table_on(conn: &Connection, table_id: &str) -> Result<Vec<Field>, GridError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fields f WHERE f.table_id = ?1 ORDER BY f.order_index, f.created_at, f.rowid",
        FIELD_COLUMNS
    ))?;
    let rows = stmt.query_map(params![table_id], field_from_row)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub(crate) fn owned_field_on(conn: &Connection, user_id: &str, field_id: &str) -> Result<Field, GridError> {
    let field = conn
        .query_row(
            &format!("SELECT {} FROM fields f WHERE f.id = ?1", FIELD_COLUMNS),
            params![field_id],
            field_from_row,
        )
        .optional()?
        .ok_or_else(|| GridError::not_found("field", field_id))?;
    owned_table_on(conn, user_id, &field.table_id)
        .map_err(|_| GridError::not_found("field", field_id))?;
    Ok(field)
}

pub fn create_field(
    store: &Store,
    session: &Session,
    table_id: &str,
    new: NewField,
) -> Result<Field, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "field.create", |conn| {
        owned_table_on(conn, user_id, table_id)?;
        insert_field_on(conn, table_id, &new)
    })
}

pub fn list_fields(store: &Store, session: &Session, table_id: &str) -> Result<Vec<Field>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "field.list", |conn| {
        owned_table_on(conn, user_id, table_id)?;
        fields_of_table_on(conn, table_id)
    })
}

pub fn get_field(store: &Store, session: &Session, field_id: &str) -> Result<Field, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "field.get", |conn| owned_field_on(conn, user_id, field_id))
}

pub fn rename_field(
    store: &Store,
    session: &Session,
    field_id: &str,
    name: &str,
) -> Result<Field, GridError> {
    let user_id = session.require_active()?;
    let name = clean_name("field", name)?;
    db::with_grid_tx(store, user_id, "field.rename", |conn| {
        let mut field = owned_field_on(conn, user_id, field_id)?;
        conn.execute("UPDATE fields SET name = ?1 WHERE id = ?2", params![name, field_id])?;
        field.name = name;
        Ok(field)
    })
}

/// Replace the choice list of a select / multiselect field.
///
/// Existing cell values are left alone; values no longer among the choices are
/// rejected only on their next edit.
pub fn update_field_options(
    store: &Store,
    session: &Session,
    field_id: &str,
    options: FieldOptions,
) -> Result<Field, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "field.update_options", |conn| {
        let mut field = owned_field_on(conn, user_id, field_id)?;
        if !field.field_type.has_choices() {
            return Err(GridError::validation(format!(
                "{} fields do not take choices",
                field.field_type
            )));
        }
        field.options = options.normalized();
        conn.execute(
            "UPDATE fields SET options = ?1 WHERE id = ?2",
            params![serde_json::to_string(&field.options)?, field_id],
        )?;
        Ok(field)
    })
}

pub fn move_field(
    store: &Store,
    session: &Session,
    field_id: &str,
    new_index: usize,
) -> Result<Field, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "field.move", |conn| {
        let mut field = owned_field_on(conn, user_id, field_id)?;
        let landed = ordering::move_to(conn, OrderScope::Fields, &field.table_id, field_id, new_index)?;
        field.order_index = landed as i64;
        Ok(field)
    })
}

/// Result of a field deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDeletion {
    pub field_id: String,
    pub policy: OrphanPolicy,
    /// Records whose data map had the key removed (always 0 under `retain`).
    pub pruned_records: usize,
}

/// Delete a field and reindex its siblings.
///
/// Record values keyed by the field follow `grid.orphaned_keys`: under `retain` they
/// stay in `records.data` as hidden legacy keys, under `prune` they are removed in
/// the same transaction.
pub fn delete_field(store: &Store, session: &Session, field_id: &str) -> Result<FieldDeletion, GridError> {
    let user_id = session.require_active()?;
    let policy = config::load_config(&store.root)?.grid.orphaned_keys;
    db::with_grid_tx(store, user_id, "field.delete", |conn| {
        let field = owned_field_on(conn, user_id, field_id)?;
        conn.execute("DELETE FROM fields WHERE id = ?1", params![field_id])?;
        ordering::reindex(conn, OrderScope::Fields, &field.table_id)?;

        let pruned_records = match policy {
            OrphanPolicy::Retain => 0,
            OrphanPolicy::Prune => prune_key_on(conn, &field.table_id, field_id)?,
        };
        Ok(FieldDeletion {
            field_id: field_id.to_string(),
            policy,
            pruned_records,
        })
    })
}

fn prune_key_on(conn: &Connection, table_id: &str, field_id: &str) -> Result<usize, GridError> {
    let rows: Vec<(String, CellMap)> = record::data_of_table_on(conn, table_id)?;
    let mut pruned = 0;
    for (record_id, mut data) in rows {
        if data.remove(field_id).is_some() {
            record::write_data_on(conn, &record_id, &data)?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[derive(Parser, Debug)]
#[clap(name = "field", about = "Manage typed fields (columns) of a table")]
pub struct FieldCli {
    #[clap(subcommand)]
    pub command: FieldCommand,
}

#[derive(Subcommand, Debug)]
pub enum FieldCommand {
    /// Add a field at the end of the table.
    Create {
        #[clap(long)]
        table: String,
        #[clap(value_name = "NAME")]
        name: String,
        /// text | number | select | multiselect | date | checkbox | url | email | phone
        #[clap(long = "type", default_value = "text")]
        field_type: String,
        /// Allowed value for select types (repeatable).
        #[clap(long = "choice")]
        choices: Vec<String>,
        #[clap(long)]
        required: bool,
    },
    /// List fields in display order.
    List {
        #[clap(long)]
        table: String,
    },
    /// Rename a field.
    Rename {
        #[clap(long)]
        id: String,
        #[clap(long)]
        name: String,
    },
    /// Replace the choices of a select / multiselect field.
    Choices {
        #[clap(long)]
        id: String,
        #[clap(long = "choice")]
        choices: Vec<String>,
    },
    /// Move a field to a new position.
    Move {
        #[clap(long)]
        id: String,
        #[clap(long)]
        to: usize,
    },
    /// Delete a field.
    Delete {
        #[clap(long)]
        id: String,
        #[clap(long)]
        yes: bool,
    },
}

pub fn run_field_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: FieldCli,
) -> Result<(), GridError> {
    match cli.command {
        FieldCommand::Create {
            table,
            name,
            field_type,
            choices,
            required,
        } => {
            let new = NewField::new(&name, field_type.parse()?)
                .with_options(FieldOptions::with_choices(choices))
                .required(required);
            let field = create_field(store, session, &table, new)?;
            output::emit(format, "field.create", serde_json::to_value(&field)?, || {
                format!(
                    "Created field {} ({}: {}) at position {}",
                    field.name, field.id, field.field_type, field.order_index
                )
            });
        }
        FieldCommand::List { table } => {
            let fields = list_fields(store, session, &table)?;
            output::emit(format, "field.list", serde_json::to_value(&fields)?, || {
                fields
                    .iter()
                    .map(|f| {
                        let mut line = format!(
                            "{:>3}. {}  {} ({})",
                            f.order_index, f.id, f.name, f.field_type
                        );
                        if f.required {
                            line.push_str(" required");
                        }
                        if !f.options.choices.is_empty() {
                            line.push_str(&format!(" [{}]", f.options.choices.join(", ")));
                        }
                        line
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        FieldCommand::Rename { id, name } => {
            let field = rename_field(store, session, &id, &name)?;
            output::emit(format, "field.rename", serde_json::to_value(&field)?, || {
                format!("Renamed field {} to {}", field.id, field.name)
            });
        }
        FieldCommand::Choices { id, choices } => {
            let field = update_field_options(store, session, &id, FieldOptions::with_choices(choices))?;
            output::emit(format, "field.choices", serde_json::to_value(&field)?, || {
                format!("Field {} choices: {}", field.name, field.options.choices.join(", "))
            });
        }
        FieldCommand::Move { id, to } => {
            let field = move_field(store, session, &id, to)?;
            output::emit(format, "field.move", serde_json::to_value(&field)?, || {
                format!("Moved field {} to position {}", field.name, field.order_index)
            });
        }
        FieldCommand::Delete { id, yes } => {
            crate::require_confirmation(yes, "field delete")?;
            let deletion = delete_field(store, session, &id)?;
            output::emit(format, "field.delete", serde_json::to_value(&deletion)?, || match deletion.policy {
                OrphanPolicy::Retain => format!("Deleted field {} (record values retained as hidden keys)", id),
                OrphanPolicy::Prune => format!(
                    "Deleted field {} (value removed from {} records)",
                    id, deletion.pruned_records
                ),
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "field",
        "version": "0.1.0",
        "description": "Typed columns; order_index is kept dense per table",
        "types": FieldType::ALL.map(|t| t.as_str()),
        "commands": [
            { "name": "create", "parameters": ["table", "name", "type", "choice", "required"] },
            { "name": "list", "parameters": ["table"] },
            { "name": "rename", "parameters": ["id", "name"] },
            { "name": "choices", "parameters": ["id", "choice"] },
            { "name": "move", "parameters": ["id", "to"] },
            { "name": "delete", "parameters": ["id", "yes"] }
        ],
        "storage": ["grid.db:fields"]
    })
}

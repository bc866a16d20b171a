use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::usage::{self, LimitKind};
use crate::plugins::workspace::{clean_name, owned_workspace_on};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ICON: &str = "database";
pub const DEFAULT_COLOR: &str = "blue";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Base {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub created_by: String,
    pub created_at: String,
}

/// Optional attributes for create/update; `None` keeps the current (or default) value.
#[derive(Debug, Clone, Default)]
pub struct BasePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

const BASE_COLUMNS: &str = "b.id, b.workspace_id, b.name, b.description, b.icon, b.color, b.created_by, b.created_at";

fn base_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Base> {
    Ok(Base {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        color: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Fetch a base inside a workspace the user owns.
pub(crate) fn owned_base_on(conn: &Connection, user_id: &str, base_id: &str) -> Result<Base, GridError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM bases b JOIN workspaces w ON b.workspace_id = w.id WHERE b.id = ?1 AND w.owner = ?2",
            BASE_COLUMNS
        ),
        params![base_id, user_id],
        base_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("base", base_id))
}

/// Insert a base after checking the `bases` plan limit. Shared with blueprint installs.
pub(crate) fn insert_base_on(
    conn: &Connection,
    default_plan: &str,
    user_id: &str,
    workspace_id: &str,
    name: &str,
    patch: &BasePatch,
) -> Result<Base, GridError> {
    owned_workspace_on(conn, user_id, workspace_id)?;
    usage::ensure_can_create_on(conn, default_plan, user_id, LimitKind::Bases)?;

    let base = Base {
        id: time::new_id(),
        workspace_id: workspace_id.to_string(),
        name: clean_name("base", name)?,
        description: patch.description.clone().unwrap_or_default(),
        icon: patch.icon.clone().unwrap_or_else(|| DEFAULT_ICON.to_string()),
        color: patch.color.clone().unwrap_or_else(|| DEFAULT_COLOR.to_string()),
        created_by: user_id.to_string(),
        created_at: time::now_epoch_z(),
    };
    conn.execute(
        "INSERT INTO bases(id, workspace_id, name, description, icon, color, created_by, created_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            base.id,
            base.workspace_id,
            base.name,
            base.description,
            base.icon,
            base.color,
            base.created_by,
            base.created_at
        ],
    )?;
    Ok(base)
}

/// Create a base; fails with `LimitReached` when the plan allows no more bases.
pub fn create_base(
    store: &Store,
    session: &Session,
    workspace_id: &str,
    name: &str,
    patch: BasePatch,
) -> Result<Base, GridError> {
    let user_id = session.require_active()?;
    let config = config::load_config(&store.root)?;
    db::with_grid_tx(store, user_id, "base.create", |conn| {
        insert_base_on(conn, &config.default_plan, user_id, workspace_id, name, &patch)
    })
}

pub fn list_bases(store: &Store, session: &Session, workspace_id: &str) -> Result<Vec<Base>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "base.list", |conn| {
        owned_workspace_on(conn, user_id, workspace_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bases b WHERE b.workspace_id = ?1 ORDER BY b.created_at, b.rowid",
            BASE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![workspace_id], base_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn get_base(store: &Store, session: &Session, base_id: &str) -> Result<Base, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "base.get", |conn| owned_base_on(conn, user_id, base_id))
}

pub fn update_base(
    store: &Store,
    session: &Session,
    base_id: &str,
    patch: BasePatch,
) -> Result<Base, GridError> {
    let user_id = session.require_active()?;
    let name = patch.name.as_deref().map(|n| clean_name("base", n)).transpose()?;
    db::with_grid_tx(store, user_id, "base.update", |conn| {
        let mut base = owned_base_on(conn, user_id, base_id)?;
        if let Some(name) = name {
            base.name = name;
        }
        if let Some(description) = patch.description {
            base.description = description;
        }
        if let Some(icon) = patch.icon {
            base.icon = icon;
        }
        if let Some(color) = patch.color {
            base.color = color;
        }
        conn.execute(
            "UPDATE bases SET name = ?1, description = ?2, icon = ?3, color = ?4 WHERE id = ?5",
            params![base.name, base.description, base.icon, base.color, base.id],
        )?;
        Ok(base)
    })
}

/// Delete a base with all of its tables, fields and records.
pub fn delete_base(store: &Store, session: &Session, base_id: &str) -> Result<(), GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "base.delete", |conn| {
        owned_base_on(conn, user_id, base_id)?;
        conn.execute("DELETE FROM bases WHERE id = ?1", params![base_id])?;
        Ok(())
    })
}

#[derive(Parser, Debug)]
#[clap(name = "base", about = "Manage bases within a workspace")]
pub struct BaseCli {
    #[clap(subcommand)]
    pub command: BaseCommand,
}

#[derive(Subcommand, Debug)]
pub enum BaseCommand {
    /// Create a base (checked against the plan's base limit).
    Create {
        #[clap(long)]
        workspace: String,
        #[clap(value_name = "NAME")]
        name: String,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        icon: Option<String>,
        #[clap(long)]
        color: Option<String>,
    },
    /// List bases in a workspace.
    List {
        #[clap(long)]
        workspace: String,
    },
    /// Update a base's name, description, icon or color.
    Update {
        #[clap(long)]
        id: String,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        description: Option<String>,
        #[clap(long)]
        icon: Option<String>,
        #[clap(long)]
        color: Option<String>,
    },
    /// Delete a base and everything in it.
    Delete {
        #[clap(long)]
        id: String,
        #[clap(long)]
        yes: bool,
    },
}

pub fn run_base_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: BaseCli,
) -> Result<(), GridError> {
    match cli.command {
        BaseCommand::Create {
            workspace,
            name,
            description,
            icon,
            color,
        } => {
            let patch = BasePatch {
                name: None,
                description,
                icon,
                color,
            };
            let base = create_base(store, session, &workspace, &name, patch)?;
            output::emit(format, "base.create", serde_json::to_value(&base)?, || {
                format!("Created base {} ({})", base.name, base.id)
            });
        }
        BaseCommand::List { workspace } => {
            let bases = list_bases(store, session, &workspace)?;
            output::emit(format, "base.list", serde_json::to_value(&bases)?, || {
                bases
                    .iter()
                    .map(|b| format!("{}  [{}:{}] {}", b.id, b.icon, b.color, b.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        BaseCommand::Update {
            id,
            name,
            description,
            icon,
            color,
        } => {
            let patch = BasePatch {
                name,
                description,
                icon,
                color,
            };
            let base = update_base(store, session, &id, patch)?;
            output::emit(format, "base.update", serde_json::to_value(&base)?, || {
                format!("Updated base {} ({})", base.name, base.id)
            });
        }
        BaseCommand::Delete { id, yes } => {
            crate::require_confirmation(yes, "base delete")?;
            delete_base(store, session, &id)?;
            output::emit(format, "base.delete", serde_json::json!({ "id": id }), || {
                format!("Deleted base {}", id)
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "base",
        "version": "0.1.0",
        "description": "Spreadsheet-like databases inside a workspace",
        "commands": [
            { "name": "create", "parameters": ["workspace", "name", "description", "icon", "color"] },
            { "name": "list", "parameters": ["workspace"] },
            { "name": "update", "parameters": ["id", "name", "description", "icon", "color"] },
            { "name": "delete", "parameters": ["id", "yes"] }
        ],
        "storage": ["grid.db:bases"]
    })
}

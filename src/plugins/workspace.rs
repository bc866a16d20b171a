use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub created_at: String,
}

pub(crate) fn clean_name(kind: &str, name: &str) -> Result<String, GridError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(GridError::validation(format!("{} name must not be empty", kind)));
    }
    Ok(trimmed.to_string())
}

fn workspace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Fetch a workspace the user owns; foreign workspaces read as not found.
pub(crate) fn owned_workspace_on(
    conn: &Connection,
    user_id: &str,
    workspace_id: &str,
) -> Result<Workspace, GridError> {
    conn.query_row(
        "SELECT id, name, owner, created_at FROM workspaces WHERE id = ?1 AND owner = ?2",
        params![workspace_id, user_id],
        workspace_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("workspace", workspace_id))
}

fn insert_workspace(conn: &Connection, user_id: &str, name: &str) -> Result<Workspace, GridError> {
    let ws = Workspace {
        id: time::new_id(),
        name: clean_name("workspace", name)?,
        owner: user_id.to_string(),
        created_at: time::now_epoch_z(),
    };
    conn.execute(
        "INSERT INTO workspaces(id, name, owner, created_at) VALUES(?1, ?2, ?3, ?4)",
        params![ws.id, ws.name, ws.owner, ws.created_at],
    )?;
    Ok(ws)
}

/// First sign-in of a user: subscribe them to the default plan and create their
/// default workspace. Returns the existing default workspace when already signed up.
pub fn sign_up(store: &Store, session: &Session) -> Result<Workspace, GridError> {
    let user_id = session.require_active()?;
    let config = config::load_config(&store.root)?;
    db::with_grid_tx(store, user_id, "workspace.sign_up", |conn| {
        let existing = conn
            .query_row(
                "SELECT id, name, owner, created_at FROM workspaces WHERE owner = ?1 ORDER BY created_at, rowid LIMIT 1",
                params![user_id],
                workspace_from_row,
            )
            .optional()?;
        if let Some(ws) = existing {
            return Ok(ws);
        }
        conn.execute(
            "INSERT OR IGNORE INTO user_subscriptions(user_id, plan_id, status, started_at) VALUES(?1, ?2, 'active', ?3)",
            params![user_id, config.default_plan, time::now_epoch_z()],
        )?;
        insert_workspace(conn, user_id, &format!("{}'s Workspace", user_id))
    })
}

pub fn create_workspace(store: &Store, session: &Session, name: &str) -> Result<Workspace, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "workspace.create", |conn| {
        insert_workspace(conn, user_id, name)
    })
}

pub fn list_workspaces(store: &Store, session: &Session) -> Result<Vec<Workspace>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "workspace.list", |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, owner, created_at FROM workspaces WHERE owner = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![user_id], workspace_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

pub fn get_workspace(store: &Store, session: &Session, workspace_id: &str) -> Result<Workspace, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "workspace.get", |conn| {
        owned_workspace_on(conn, user_id, workspace_id)
    })
}

pub fn rename_workspace(
    store: &Store,
    session: &Session,
    workspace_id: &str,
    name: &str,
) -> Result<Workspace, GridError> {
    let user_id = session.require_active()?;
    let name = clean_name("workspace", name)?;
    db::with_grid_tx(store, user_id, "workspace.rename", |conn| {
        let mut ws = owned_workspace_on(conn, user_id, workspace_id)?;
        conn.execute(
            "UPDATE workspaces SET name = ?1 WHERE id = ?2",
            params![name, workspace_id],
        )?;
        ws.name = name;
        Ok(ws)
    })
}

/// Delete a workspace; bases, tables, fields and records go with it.
pub fn delete_workspace(store: &Store, session: &Session, workspace_id: &str) -> Result<(), GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "workspace.delete", |conn| {
        owned_workspace_on(conn, user_id, workspace_id)?;
        conn.execute("DELETE FROM workspaces WHERE id = ?1", params![workspace_id])?;
        Ok(())
    })
}

#[derive(Parser, Debug)]
#[clap(name = "workspace", about = "Manage workspaces")]
pub struct WorkspaceCli {
    #[clap(subcommand)]
    pub command: WorkspaceCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// Create a workspace.
    Create {
        #[clap(value_name = "NAME")]
        name: String,
    },
    /// List your workspaces.
    List,
    /// Rename a workspace.
    Rename {
        #[clap(long)]
        id: String,
        #[clap(long)]
        name: String,
    },
    /// Delete a workspace and everything in it.
    Delete {
        #[clap(long)]
        id: String,
        /// Confirm the deletion.
        #[clap(long)]
        yes: bool,
    },
}

pub fn run_workspace_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: WorkspaceCli,
) -> Result<(), GridError> {
    match cli.command {
        WorkspaceCommand::Create { name } => {
            let ws = create_workspace(store, session, &name)?;
            output::emit(format, "workspace.create", serde_json::to_value(&ws)?, || {
                format!("Created workspace {} ({})", ws.name, ws.id)
            });
        }
        WorkspaceCommand::List => {
            let list = list_workspaces(store, session)?;
            output::emit(format, "workspace.list", serde_json::to_value(&list)?, || {
                list.iter()
                    .map(|ws| format!("{}  {}", ws.id, ws.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        WorkspaceCommand::Rename { id, name } => {
            let ws = rename_workspace(store, session, &id, &name)?;
            output::emit(format, "workspace.rename", serde_json::to_value(&ws)?, || {
                format!("Renamed workspace {} to {}", ws.id, ws.name)
            });
        }
        WorkspaceCommand::Delete { id, yes } => {
            crate::require_confirmation(yes, "workspace delete")?;
            delete_workspace(store, session, &id)?;
            output::emit(format, "workspace.delete", serde_json::json!({ "id": id }), || {
                format!("Deleted workspace {}", id)
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "workspace",
        "version": "0.1.0",
        "description": "Top-level tenant containers owning bases",
        "commands": [
            { "name": "create", "parameters": ["name"] },
            { "name": "list" },
            { "name": "rename", "parameters": ["id", "name"] },
            { "name": "delete", "parameters": ["id", "yes"] }
        ],
        "storage": ["grid.db:workspaces"]
    })
}

//! Blueprint marketplace.
//!
//! Blueprints are JSON documents compiled into the binary from `blueprints/`.
//! Installing one creates a base with its tables and fields in a single transaction.

use crate::core::cell::{FieldOptions, FieldType};
use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::base::{self, Base, BasePatch};
use crate::plugins::field::{self, NewField};
use crate::plugins::table::{self, Table};
use crate::plugins::workspace::owned_workspace_on;
use clap::{Parser, Subcommand};
use rust_embed::RustEmbed;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(RustEmbed)]
#[folder = "blueprints/"]
#[include = "*.json"]
struct BlueprintAssets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintTable {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<BlueprintField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub tables: Vec<BlueprintTable>,
}

/// A blueprint together with the SHA-256 of its source JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub blueprint: Blueprint,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Install {
    pub id: String,
    pub blueprint_id: String,
    pub workspace_id: String,
    pub base_id: String,
    pub user_id: String,
    pub checksum: String,
    pub installed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallReport {
    pub install: Install,
    pub base: Base,
    pub tables: Vec<Table>,
    pub field_count: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn load_entry(path: &str) -> Result<CatalogEntry, GridError> {
    let file = BlueprintAssets::get(path)
        .ok_or_else(|| GridError::not_found("blueprint asset", path))?;
    let blueprint: Blueprint = serde_json::from_slice(&file.data)?;
    if blueprint.tables.is_empty() {
        return Err(GridError::validation(format!("blueprint '{}' has no tables", blueprint.id)));
    }
    Ok(CatalogEntry {
        checksum: sha256_hex(&file.data),
        blueprint,
    })
}

/// Every embedded blueprint, sorted by id.
pub fn list_blueprints() -> Result<Vec<CatalogEntry>, GridError> {
    let mut paths: Vec<String> = BlueprintAssets::iter().map(|p| p.to_string()).collect();
    paths.sort();
    paths.iter().map(|p| load_entry(p)).collect()
}

pub fn get_blueprint(blueprint_id: &str) -> Result<CatalogEntry, GridError> {
    list_blueprints()?
        .into_iter()
        .find(|e| e.blueprint.id == blueprint_id)
        .ok_or_else(|| GridError::not_found("blueprint", blueprint_id))
}

/// Install a blueprint into a workspace: one new base (checked against the base
/// limit) plus every table and field, and an install row. All or nothing.
pub fn install_blueprint(
    store: &Store,
    session: &Session,
    workspace_id: &str,
    blueprint_id: &str,
) -> Result<InstallReport, GridError> {
    let user_id = session.require_active()?;
    let entry = get_blueprint(blueprint_id)?;
    let config = config::load_config(&store.root)?;
    let bp = &entry.blueprint;

    db::with_grid_tx(store, user_id, "marketplace.install", |conn| {
        let patch = BasePatch {
            name: None,
            description: Some(bp.description.clone()),
            icon: bp.icon.clone(),
            color: bp.color.clone(),
        };
        let base = base::insert_base_on(conn, &config.default_plan, user_id, workspace_id, &bp.name, &patch)?;

        let mut tables = Vec::with_capacity(bp.tables.len());
        let mut field_count = 0;
        for bt in &bp.tables {
            let (table, _primary) = table::insert_table_on(conn, &base.id, &bt.name)?;
            field_count += 1;
            for bf in &bt.fields {
                let new = NewField::new(&bf.name, bf.field_type)
                    .with_options(FieldOptions::with_choices(&bf.choices))
                    .required(bf.required);
                field::insert_field_on(conn, &table.id, &new)?;
                field_count += 1;
            }
            tables.push(table);
        }

        let install = Install {
            id: time::new_id(),
            blueprint_id: bp.id.clone(),
            workspace_id: workspace_id.to_string(),
            base_id: base.id.clone(),
            user_id: user_id.to_string(),
            checksum: entry.checksum.clone(),
            installed_at: time::now_epoch_z(),
        };
        conn.execute(
            "INSERT INTO blueprint_installs(id, blueprint_id, workspace_id, base_id, user_id, checksum, installed_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                install.id,
                install.blueprint_id,
                install.workspace_id,
                install.base_id,
                install.user_id,
                install.checksum,
                install.installed_at
            ],
        )?;
        Ok(InstallReport {
            install,
            base,
            tables,
            field_count,
        })
    })
}

pub fn list_installs(store: &Store, session: &Session, workspace_id: &str) -> Result<Vec<Install>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "marketplace.installs", |conn| {
        owned_workspace_on(conn, user_id, workspace_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, blueprint_id, workspace_id, base_id, user_id, checksum, installed_at
             FROM blueprint_installs WHERE workspace_id = ?1 ORDER BY installed_at, rowid",
        )?;
        let rows = stmt.query_map(params![workspace_id], |row| {
            Ok(Install {
                id: row.get(0)?,
                blueprint_id: row.get(1)?,
                workspace_id: row.get(2)?,
                base_id: row.get(3)?,
                user_id: row.get(4)?,
                checksum: row.get(5)?,
                installed_at: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "marketplace", about = "Browse and install base blueprints")]
pub struct MarketplaceCli {
    #[clap(subcommand)]
    pub command: MarketplaceCommand,
}

#[derive(Subcommand, Debug)]
pub enum MarketplaceCommand {
    /// List available blueprints.
    List,
    /// Show one blueprint's tables and fields.
    Show {
        #[clap(value_name = "BLUEPRINT")]
        id: String,
    },
    /// Install a blueprint into a workspace as a new base.
    Install {
        #[clap(long)]
        workspace: String,
        #[clap(value_name = "BLUEPRINT")]
        id: String,
    },
    /// List installs in a workspace.
    Installs {
        #[clap(long)]
        workspace: String,
    },
}

pub fn run_marketplace_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: MarketplaceCli,
) -> Result<(), GridError> {
    match cli.command {
        MarketplaceCommand::List => {
            let entries = list_blueprints()?;
            output::emit(format, "marketplace.list", serde_json::to_value(&entries)?, || {
                entries
                    .iter()
                    .map(|e| {
                        format!(
                            "{:<18} {} ({} tables) - {}",
                            e.blueprint.id,
                            e.blueprint.name,
                            e.blueprint.tables.len(),
                            e.blueprint.description
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        MarketplaceCommand::Show { id } => {
            let entry = get_blueprint(&id)?;
            output::emit(format, "marketplace.show", serde_json::to_value(&entry)?, || {
                let mut lines = vec![format!("{} [{}]", entry.blueprint.name, entry.checksum)];
                for t in &entry.blueprint.tables {
                    lines.push(format!("  {}", t.name));
                    lines.push(format!("    {} (text)", table::PRIMARY_FIELD_NAME));
                    for f in &t.fields {
                        lines.push(format!("    {} ({})", f.name, f.field_type));
                    }
                }
                lines.join("\n")
            });
        }
        MarketplaceCommand::Install { workspace, id } => {
            let report = install_blueprint(store, session, &workspace, &id)?;
            output::emit(format, "marketplace.install", serde_json::to_value(&report)?, || {
                format!(
                    "Installed {} as base {} ({} tables, {} fields)",
                    id,
                    report.base.id,
                    report.tables.len(),
                    report.field_count
                )
            });
        }
        MarketplaceCommand::Installs { workspace } => {
            let installs = list_installs(store, session, &workspace)?;
            output::emit(format, "marketplace.installs", serde_json::to_value(&installs)?, || {
                installs
                    .iter()
                    .map(|i| format!("{}  {} -> base {}", i.id, i.blueprint_id, i.base_id))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "marketplace",
        "version": "0.1.0",
        "description": "Embedded base blueprints installed atomically",
        "commands": [
            { "name": "list" },
            { "name": "show", "parameters": ["id"] },
            { "name": "install", "parameters": ["workspace", "id"] },
            { "name": "installs", "parameters": ["workspace"] }
        ],
        "storage": ["grid.db:blueprint_installs"]
    })
}

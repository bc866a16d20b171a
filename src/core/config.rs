//! Store configuration loaded from `<store>/config.toml`.
//!
//! Every key is optional; a missing file yields [`GridConfig::default`].

use crate::core::error::GridError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_PLAN_ID: &str = "free";

/// What happens to record values keyed by a field that gets deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Keep the key in `records.data` as a hidden legacy value.
    #[default]
    Retain,
    /// Strip the key from every record of the table in the same transaction.
    Prune,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSection {
    #[serde(default)]
    pub orphaned_keys: OrphanPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuilderSection {
    /// Artificial latency of the stub capability, in milliseconds.
    #[serde(default)]
    pub reply_delay_ms: u64,
}

/// A plan as written in config; limits use `-1` for unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDef {
    pub id: String,
    pub name: String,
    pub max_projects: i64,
    pub max_bases: i64,
    pub max_records_per_base: i64,
    pub max_storage_mb: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub grid: GridSection,
    #[serde(default)]
    pub builder: BuilderSection,
    #[serde(default)]
    pub plans: Vec<PlanDef>,
    #[serde(default = "default_plan_id")]
    pub default_plan: String,
}

fn default_plan_id() -> String {
    DEFAULT_PLAN_ID.to_string()
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid: GridSection::default(),
            builder: BuilderSection::default(),
            plans: Vec::new(),
            default_plan: default_plan_id(),
        }
    }
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE_NAME)
}

pub fn parse_config(content: &str) -> Result<GridConfig, GridError> {
    toml::from_str(content).map_err(|e| GridError::ConfigError(e.to_string()))
}

pub fn load_config(root: &Path) -> Result<GridConfig, GridError> {
    let path = config_path(root);
    if !path.exists() {
        return Ok(GridConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    parse_config(&content)
}

//! Subscription plans and the usage gate.
//!
//! Plan limits are stored as integers where `-1` means unlimited. Everything above
//! the SQL layer works with [`Limit`] instead, so the sentinel never leaks into
//! comparisons or display.

use crate::core::config::{self, GridConfig, PlanDef};
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const UNLIMITED_SENTINEL: i64 = -1;
const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    Unlimited,
    AtMost(u64),
}

impl Limit {
    pub fn from_stored(raw: i64) -> Result<Self, GridError> {
        match raw {
            UNLIMITED_SENTINEL => Ok(Limit::Unlimited),
            n if n >= 0 => Ok(Limit::AtMost(n as u64)),
            n => Err(GridError::validation(format!(
                "plan limit {} is negative (only -1 means unlimited)",
                n
            ))),
        }
    }

    pub fn to_stored(self) -> i64 {
        match self {
            Limit::Unlimited => UNLIMITED_SENTINEL,
            Limit::AtMost(n) => n as i64,
        }
    }

    /// Whether one more item may be created when `current` already exist.
    pub fn allows_another(self, current: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::AtMost(max) => current < max,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::AtMost(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Projects,
    Bases,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Projects => "projects",
            LimitKind::Bases => "bases",
        }
    }
}

impl FromStr for LimitKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "projects" => Ok(LimitKind::Projects),
            "bases" => Ok(LimitKind::Bases),
            other => Err(GridError::validation(format!(
                "unknown limit type '{}' (expected projects or bases)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub max_projects: Limit,
    pub max_bases: Limit,
    pub max_records_per_base: Limit,
    pub max_storage_mb: Limit,
    pub features: Vec<String>,
}

impl Plan {
    pub fn limit_for(&self, kind: LimitKind) -> Limit {
        match kind {
            LimitKind::Projects => self.max_projects,
            LimitKind::Bases => self.max_bases,
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    fn from_def(def: &PlanDef) -> Result<Self, GridError> {
        Ok(Self {
            id: def.id.clone(),
            name: def.name.clone(),
            max_projects: Limit::from_stored(def.max_projects)?,
            max_bases: Limit::from_stored(def.max_bases)?,
            max_records_per_base: Limit::from_stored(def.max_records_per_base)?,
            max_storage_mb: Limit::from_stored(def.max_storage_mb)?,
            features: def.features.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSubscription {
    pub user_id: String,
    pub plan_id: String,
    pub status: String,
    pub started_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounts {
    pub projects: u64,
    pub bases: u64,
    pub storage_bytes: u64,
}

impl UsageCounts {
    pub fn count_for(&self, kind: LimitKind) -> u64 {
        match kind {
            LimitKind::Projects => self.projects,
            LimitKind::Bases => self.bases,
        }
    }

    /// Storage rounded up to whole megabytes.
    pub fn storage_mb(&self) -> u64 {
        self.storage_bytes.div_ceil(BYTES_PER_MB)
    }
}

pub fn builtin_plans() -> Vec<PlanDef> {
    let plan = |id: &str, name: &str, limits: [i64; 4], features: &[&str]| PlanDef {
        id: id.to_string(),
        name: name.to_string(),
        max_projects: limits[0],
        max_bases: limits[1],
        max_records_per_base: limits[2],
        max_storage_mb: limits[3],
        features: features.iter().map(|f| f.to_string()).collect(),
    };
    vec![
        plan("free", "Free", [3, 3, 1000, 100], &["grid"]),
        plan(
            "pro",
            "Pro",
            [20, 50, 50_000, 10_240],
            &["grid", "ai_builder", "marketplace"],
        ),
        plan(
            "enterprise",
            "Enterprise",
            [-1, -1, -1, -1],
            &["grid", "ai_builder", "marketplace", "pipelines"],
        ),
    ]
}

/// The built-in catalogue merged with config plans (same id overrides).
///
/// Every limit must decode and `default_plan` must name a plan in the result.
pub fn plan_catalogue(config: &GridConfig) -> Result<Vec<PlanDef>, GridError> {
    let mut defs = builtin_plans();
    for extra in &config.plans {
        match defs.iter_mut().find(|d| d.id == extra.id) {
            Some(existing) => *existing = extra.clone(),
            None => defs.push(extra.clone()),
        }
    }
    for def in &defs {
        Plan::from_def(def)?;
    }
    if !defs.iter().any(|d| d.id == config.default_plan) {
        return Err(GridError::ConfigError(format!(
            "default_plan '{}' is not a known plan",
            config.default_plan
        )));
    }
    Ok(defs)
}

/// Write the plan catalogue to the store.
pub fn initialize_plans(store: &Store) -> Result<(), GridError> {
    let config = config::load_config(&store.root)?;
    let defs = plan_catalogue(&config)?;

    db::with_grid_tx(store, "gridbase", "usage.init_plans", |conn| {
        for def in &defs {
            conn.execute(
                "INSERT INTO subscription_plans(id, name, max_projects, max_bases, max_records_per_base, max_storage_mb, features)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, max_projects = excluded.max_projects,
                    max_bases = excluded.max_bases, max_records_per_base = excluded.max_records_per_base,
                    max_storage_mb = excluded.max_storage_mb, features = excluded.features",
                params![
                    def.id,
                    def.name,
                    def.max_projects,
                    def.max_bases,
                    def.max_records_per_base,
                    def.max_storage_mb,
                    serde_json::to_string(&def.features)?
                ],
            )?;
        }
        Ok(())
    })
}

fn plan_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlanDef> {
    let features: String = row.get(6)?;
    Ok(PlanDef {
        id: row.get(0)?,
        name: row.get(1)?,
        max_projects: row.get(2)?,
        max_bases: row.get(3)?,
        max_records_per_base: row.get(4)?,
        max_storage_mb: row.get(5)?,
        features: serde_json::from_str(&features).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
        })?,
    })
}

const PLAN_COLUMNS: &str =
    "id, name, max_projects, max_bases, max_records_per_base, max_storage_mb, features";

pub(crate) fn plan_on(conn: &Connection, plan_id: &str) -> Result<Plan, GridError> {
    let def = conn
        .query_row(
            &format!("SELECT {} FROM subscription_plans WHERE id = ?1", PLAN_COLUMNS),
            params![plan_id],
            plan_from_row,
        )
        .optional()?
        .ok_or_else(|| GridError::not_found("plan", plan_id))?;
    Plan::from_def(&def)
}

fn subscription_on(conn: &Connection, user_id: &str) -> Result<Option<UserSubscription>, GridError> {
    Ok(conn
        .query_row(
            "SELECT user_id, plan_id, status, started_at FROM user_subscriptions WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(UserSubscription {
                    user_id: row.get(0)?,
                    plan_id: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                })
            },
        )
        .optional()?)
}

/// The user's plan; users without an active subscription get `default_plan`.
pub(crate) fn active_plan_on(
    conn: &Connection,
    default_plan: &str,
    user_id: &str,
) -> Result<Plan, GridError> {
    match subscription_on(conn, user_id)? {
        Some(sub) if sub.status == "active" => plan_on(conn, &sub.plan_id),
        _ => plan_on(conn, default_plan),
    }
}

pub(crate) fn usage_on(conn: &Connection, user_id: &str) -> Result<UsageCounts, GridError> {
    let projects: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE owner = ?1 AND status = 'active'",
        params![user_id],
        |row| row.get(0),
    )?;
    let bases: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bases b JOIN workspaces w ON b.workspace_id = w.id WHERE w.owner = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    let storage_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(LENGTH(r.data)), 0) FROM records r
         JOIN grid_tables t ON r.table_id = t.id
         JOIN bases b ON t.base_id = b.id
         JOIN workspaces w ON b.workspace_id = w.id
         WHERE w.owner = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(UsageCounts {
        projects: projects as u64,
        bases: bases as u64,
        storage_bytes: storage_bytes as u64,
    })
}

/// Gate used inside create transactions; `LimitReached` when the plan is exhausted.
pub(crate) fn ensure_can_create_on(
    conn: &Connection,
    default_plan: &str,
    user_id: &str,
    kind: LimitKind,
) -> Result<(), GridError> {
    let plan = active_plan_on(conn, default_plan, user_id)?;
    let current = usage_on(conn, user_id)?.count_for(kind);
    match plan.limit_for(kind) {
        limit if limit.allows_another(current) => Ok(()),
        limit => Err(GridError::LimitReached {
            kind: kind.as_str().to_string(),
            current,
            limit: limit.to_stored() as u64,
        }),
    }
}

/// Records per base are limited by the plan of the base's workspace owner.
pub(crate) fn ensure_record_capacity_on(
    conn: &Connection,
    default_plan: &str,
    base_id: &str,
) -> Result<(), GridError> {
    let owner: String = conn
        .query_row(
            "SELECT w.owner FROM bases b JOIN workspaces w ON b.workspace_id = w.id WHERE b.id = ?1",
            params![base_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| GridError::not_found("base", base_id))?;
    let plan = active_plan_on(conn, default_plan, &owner)?;
    let current: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records r JOIN grid_tables t ON r.table_id = t.id WHERE t.base_id = ?1",
        params![base_id],
        |row| row.get(0),
    )?;
    let current = current as u64;
    match plan.max_records_per_base {
        limit if limit.allows_another(current) => Ok(()),
        limit => Err(GridError::LimitReached {
            kind: "records_per_base".to_string(),
            current,
            limit: limit.to_stored() as u64,
        }),
    }
}

pub fn list_plans(store: &Store) -> Result<Vec<Plan>, GridError> {
    db::with_grid(store, "gridbase", "usage.list_plans", |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM subscription_plans ORDER BY id",
            PLAN_COLUMNS
        ))?;
        let rows = stmt.query_map([], plan_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(Plan::from_def(&r?)?);
        }
        Ok(out)
    })
}

pub fn get_plan(store: &Store, plan_id: &str) -> Result<Plan, GridError> {
    db::with_grid(store, "gridbase", "usage.get_plan", |conn| plan_on(conn, plan_id))
}

/// Put the session user on `plan_id`, replacing any previous subscription.
pub fn subscribe(
    store: &Store,
    session: &Session,
    plan_id: &str,
) -> Result<UserSubscription, GridError> {
    let user_id = session.require_active()?;
    let sub = UserSubscription {
        user_id: user_id.to_string(),
        plan_id: plan_id.to_string(),
        status: "active".to_string(),
        started_at: time::now_epoch_z(),
    };
    db::with_grid_tx(store, user_id, "usage.subscribe", |conn| {
        plan_on(conn, plan_id)?;
        conn.execute(
            "INSERT INTO user_subscriptions(user_id, plan_id, status, started_at) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET plan_id = excluded.plan_id, status = excluded.status,
                started_at = excluded.started_at",
            params![sub.user_id, sub.plan_id, sub.status, sub.started_at],
        )?;
        Ok(())
    })?;
    Ok(sub)
}

pub fn get_subscription(store: &Store, user_id: &str) -> Result<Option<UserSubscription>, GridError> {
    db::with_grid(store, "gridbase", "usage.get_subscription", |conn| {
        subscription_on(conn, user_id)
    })
}

pub fn active_plan(store: &Store, user_id: &str) -> Result<Plan, GridError> {
    let config = config::load_config(&store.root)?;
    db::with_grid(store, "gridbase", "usage.active_plan", |conn| {
        active_plan_on(conn, &config.default_plan, user_id)
    })
}

pub fn usage_counts(store: &Store, user_id: &str) -> Result<UsageCounts, GridError> {
    db::with_grid(store, "gridbase", "usage.counts", |conn| usage_on(conn, user_id))
}

/// "May this user create one more?" Unlimited plans always answer yes.
pub fn can_create(store: &Store, user_id: &str, kind: LimitKind) -> Result<bool, GridError> {
    let config = config::load_config(&store.root)?;
    db::with_grid(store, "gridbase", "usage.can_create", |conn| {
        match ensure_can_create_on(conn, &config.default_plan, user_id, kind) {
            Ok(()) => Ok(true),
            Err(GridError::LimitReached { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    })
}

pub fn records_allowed(store: &Store, base_id: &str) -> Result<bool, GridError> {
    let config = config::load_config(&store.root)?;
    db::with_grid(store, "gridbase", "usage.records_allowed", |conn| {
        match ensure_record_capacity_on(conn, &config.default_plan, base_id) {
            Ok(()) => Ok(true),
            Err(GridError::LimitReached { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    })
}

pub fn has_feature(store: &Store, user_id: &str, feature: &str) -> Result<bool, GridError> {
    Ok(active_plan(store, user_id)?.has_feature(feature))
}

#[derive(Parser, Debug)]
#[clap(name = "usage", about = "Plans, subscriptions and usage limits")]
pub struct UsageCli {
    #[clap(subcommand)]
    pub command: UsageCommand,
}

#[derive(Subcommand, Debug)]
pub enum UsageCommand {
    /// List available plans.
    Plans,
    /// Show the current plan and usage against its limits.
    Show,
    /// Switch to another plan.
    Subscribe {
        #[clap(long)]
        plan: String,
    },
    /// Check whether one more project or base may be created.
    Check {
        /// projects | bases
        #[clap(long)]
        kind: String,
    },
}

pub fn run_usage_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: UsageCli,
) -> Result<(), GridError> {
    match cli.command {
        UsageCommand::Plans => {
            let plans = list_plans(store)?;
            output::emit(format, "usage.plans", serde_json::to_value(&plans)?, || {
                plans
                    .iter()
                    .map(|p| {
                        format!(
                            "{:<12} {:<12} projects={} bases={} records/base={} storage={}MB",
                            p.id,
                            p.name,
                            p.max_projects,
                            p.max_bases,
                            p.max_records_per_base,
                            p.max_storage_mb
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        UsageCommand::Show => {
            let user_id = session.require_active()?;
            let plan = active_plan(store, user_id)?;
            let counts = usage_counts(store, user_id)?;
            let payload = serde_json::json!({ "plan": plan, "usage": counts });
            output::emit(format, "usage.show", payload, || {
                format!(
                    "Plan: {} ({})\nProjects: {} / {}\nBases: {} / {}\nStorage: {}MB / {}",
                    plan.name,
                    plan.id,
                    counts.projects,
                    plan.max_projects,
                    counts.bases,
                    plan.max_bases,
                    counts.storage_mb(),
                    plan.max_storage_mb
                )
            });
        }
        UsageCommand::Subscribe { plan } => {
            let sub = subscribe(store, session, &plan)?;
            output::emit(format, "usage.subscribe", serde_json::to_value(&sub)?, || {
                format!("Subscribed {} to plan '{}'", sub.user_id, sub.plan_id)
            });
        }
        UsageCommand::Check { kind } => {
            let kind: LimitKind = kind.parse()?;
            let allowed = can_create(store, session.require_active()?, kind)?;
            output::emit(
                format,
                "usage.check",
                serde_json::json!({ "kind": kind, "allowed": allowed }),
                || {
                    if allowed {
                        format!("OK: another {} may be created", kind.as_str())
                    } else {
                        format!("BLOCKED: {} limit reached for current plan", kind.as_str())
                    }
                },
            );
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "usage",
        "version": "0.1.0",
        "description": "Subscription plans and advisory creation limits (-1 = unlimited)",
        "commands": [
            { "name": "plans" },
            { "name": "show" },
            { "name": "subscribe", "parameters": ["plan"] },
            { "name": "check", "parameters": ["kind"] }
        ],
        "storage": ["grid.db:subscription_plans", "grid.db:user_subscriptions"]
    })
}

//! Gridbase: a local-first no-code database core.
//!
//! Users own **workspaces**; a workspace holds **bases**; a base holds ordered
//! **tables**; each table has ordered, typed **fields** and **records** whose
//! values are keyed by field id. Creation of bases, projects and records is gated
//! by the user's subscription **plan**, where a stored limit of `-1` means
//! unlimited. On top of the grid sit an app **builder** (chat sessions and change
//! requests), a staged build **pipeline** and a blueprint **marketplace**, all
//! driven through the pluggable [`plugins::builder::BuildCapability`].
//!
//! # Architecture
//!
//! All state lives in one SQLite file, `<root>/grid.db`. Every access goes
//! through [`core::broker::DbBroker`], which serializes writers in-process and
//! appends one line per call to `<root>/broker.events.jsonl`. Multi-row writes
//! (a table plus its primary field, a blueprint install, reindexing after a
//! delete) run in a single transaction.
//!
//! There is no ambient user: every operation takes an explicit
//! [`core::store::Session`].
//!
//! # Examples
//!
//! ```bash
//! gridbase init
//! gridbase --user ada signup
//! gridbase --user ada base create --workspace <WS> "Sales"
//! gridbase --user ada table create --base <BASE> "Leads"
//! gridbase --user ada record add --table <TABLE>
//! gridbase --user ada --format json record list --table <TABLE>
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: store, broker, schema, typed cells, ordering, config and output
//! - [`plugins`]: workspace, base, table, field, record, usage, builder, pipeline, marketplace

pub mod core;
pub mod plugins;

use core::{
    broker::{self, DbBroker},
    config, db, error,
    output::{self, OutputFormat},
    store::{Session, Store},
};
use plugins::{base, builder, field, marketplace, pipeline, record, table, usage, workspace};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Store directory used when `--root` is not given.
pub const DEFAULT_ROOT: &str = ".gridbase";
/// User id used when neither `--user` nor `GRIDBASE_USER` is set.
pub const DEFAULT_USER: &str = "local";

#[derive(Parser, Debug)]
#[clap(
    name = "gridbase",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local-first no-code database: workspaces, bases, typed tables and records"
)]
struct Cli {
    /// Store directory holding grid.db, config.toml and the audit log.
    #[clap(long, global = true, default_value = DEFAULT_ROOT)]
    root: PathBuf,
    /// Acting user id.
    #[clap(long, global = true, env = "GRIDBASE_USER", default_value = DEFAULT_USER)]
    user: String,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store directory, the database and the plan catalogue.
    Init,
    /// Subscribe the user to the default plan and create their workspace.
    Signup {
        #[clap(long)]
        email: Option<String>,
    },
    #[clap(name = "workspace")]
    Workspace(workspace::WorkspaceCli),
    #[clap(name = "base")]
    Base(base::BaseCli),
    #[clap(name = "table")]
    Table(table::TableCli),
    #[clap(name = "field")]
    Field(field::FieldCli),
    #[clap(name = "record")]
    Record(record::RecordCli),
    #[clap(name = "usage")]
    Usage(usage::UsageCli),
    #[clap(name = "builder")]
    Builder(builder::BuilderCli),
    #[clap(name = "pipeline")]
    Pipeline(pipeline::PipelineCli),
    #[clap(name = "marketplace")]
    Marketplace(marketplace::MarketplaceCli),
    /// Show recent entries of the audit log.
    Audit {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print the machine-readable description of every subsystem.
    Schema,
}

/// Refuse a destructive command unless `--yes` was passed.
pub fn require_confirmation(yes: bool, what: &str) -> Result<(), error::GridError> {
    if yes {
        Ok(())
    } else {
        Err(error::GridError::validation(format!(
            "{} is destructive; re-run with --yes to confirm",
            what
        )))
    }
}

/// Create `grid.db` and write the plan catalogue. Safe to run repeatedly.
pub fn initialize_store(root: &Path) -> Result<Store, error::GridError> {
    // Fail on a malformed config before creating anything.
    let config = config::load_config(root)?;
    usage::plan_catalogue(&config)?;
    db::initialize_grid_db(root)?;
    let store = Store::new(root);
    usage::initialize_plans(&store)?;
    Ok(store)
}

fn open_store(root: &Path) -> Result<Store, error::GridError> {
    if !db::grid_db_path(root).exists() {
        return Err(error::GridError::NotFound(format!(
            "no store at '{}'. Run `gridbase init` first.",
            root.display()
        )));
    }
    Ok(Store::new(root))
}

pub fn schema_catalog() -> serde_json::Value {
    serde_json::json!({
        "name": "gridbase",
        "version": env!("CARGO_PKG_VERSION"),
        "subsystems": [
            broker::schema(),
            workspace::schema(),
            base::schema(),
            table::schema(),
            field::schema(),
            record::schema(),
            usage::schema(),
            builder::schema(),
            pipeline::schema(),
            marketplace::schema(),
        ]
    })
}

pub fn run() -> Result<(), error::GridError> {
    let cli = Cli::parse();
    let format = cli.format;

    match cli.command {
        Command::Init => {
            use colored::Colorize;
            let store = initialize_store(&cli.root)?;
            let plans = usage::list_plans(&store)?;
            output::emit(
                format,
                "init",
                serde_json::json!({ "root": store.root, "plans": plans.len() }),
                || {
                    format!(
                        "{} Initialized store at {} ({} plans)",
                        "✓".bright_green(),
                        store.root.display().to_string().bright_cyan(),
                        plans.len()
                    )
                },
            );
            return Ok(());
        }
        Command::Schema => {
            output::emit(format, "schema", schema_catalog(), || {
                serde_json::to_string_pretty(&schema_catalog()).unwrap_or_default()
            });
            return Ok(());
        }
        _ => {}
    }

    let store = open_store(&cli.root)?;

    match cli.command {
        Command::Init | Command::Schema => Ok(()),
        Command::Audit { limit } => {
            let events = DbBroker::new(&store.root).recent_events(limit)?;
            output::emit(format, "audit", serde_json::to_value(&events)?, || {
                events
                    .iter()
                    .map(|e| format!("{}  {:<8} {:<28} {}", e.ts, e.status, e.op, e.actor))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
            Ok(())
        }
        command => {
            let session = Session::sign_in(&cli.user, None)?;
            match command {
                Command::Signup { email } => {
                    let session = Session::sign_in(&cli.user, email.as_deref())?;
                    let ws = workspace::sign_up(&store, &session)?;
                    output::emit(format, "signup", serde_json::to_value(&ws)?, || {
                        format!("Signed up {}: workspace {} ({})", session.user_id, ws.name, ws.id)
                    });
                    Ok(())
                }
                Command::Workspace(c) => workspace::run_workspace_cli(&store, &session, format, c),
                Command::Base(c) => base::run_base_cli(&store, &session, format, c),
                Command::Table(c) => table::run_table_cli(&store, &session, format, c),
                Command::Field(c) => field::run_field_cli(&store, &session, format, c),
                Command::Record(c) => record::run_record_cli(&store, &session, format, c),
                Command::Usage(c) => usage::run_usage_cli(&store, &session, format, c),
                Command::Builder(c) => builder::run_builder_cli(&store, &session, format, c),
                Command::Pipeline(c) => pipeline::run_pipeline_cli(&store, &session, format, c),
                Command::Marketplace(c) => marketplace::run_marketplace_cli(&store, &session, format, c),
                Command::Init | Command::Schema | Command::Audit { .. } => Ok(()),
            }
        }
    }
}

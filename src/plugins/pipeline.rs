//! Build pipeline: a fixed stage sequence run through a [`BuildCapability`].

use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::builder::{
    BuildCapability, BuildRequest, ProjectStatus, StubCapability, owned_project_on, text_conversion,
};
use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Stages in execution order.
pub const STAGES: [&str; 4] = ["plan", "generate", "review", "package"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Result<Self, GridError> {
        match raw {
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            other => Err(GridError::validation(format!("unknown run status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    fn parse(raw: &str) -> Result<Self, GridError> {
        match raw {
            "pending" => Ok(StageStatus::Pending),
            "succeeded" => Ok(StageStatus::Succeeded),
            "failed" => Ok(StageStatus::Failed),
            "skipped" => Ok(StageStatus::Skipped),
            other => Err(GridError::validation(format!("unknown stage status '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineRun {
    pub id: String,
    pub project_id: String,
    pub prompt: String,
    pub capability: String,
    pub status: RunStatus,
    pub created_by: String,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StageRow {
    pub run_id: String,
    pub stage: String,
    pub position: i64,
    pub status: StageStatus,
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunReport {
    pub run: PipelineRun,
    pub stages: Vec<StageRow>,
}

const RUN_COLUMNS: &str =
    "r.id, r.project_id, r.prompt, r.capability, r.status, r.created_by, r.created_at, r.finished_at";

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PipelineRun> {
    let status: String = row.get(4)?;
    Ok(PipelineRun {
        id: row.get(0)?,
        project_id: row.get(1)?,
        prompt: row.get(2)?,
        capability: row.get(3)?,
        status: RunStatus::parse(&status).map_err(|e| text_conversion(4, e))?,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}

fn stages_on(conn: &Connection, run_id: &str) -> Result<Vec<StageRow>, GridError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, stage, position, status, output FROM pipeline_stages WHERE run_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        let status: String = row.get(3)?;
        Ok(StageRow {
            run_id: row.get(0)?,
            stage: row.get(1)?,
            position: row.get(2)?,
            status: StageStatus::parse(&status).map_err(|e| text_conversion(3, e))?,
            output: row.get(4)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn owned_run_on(conn: &Connection, user_id: &str, run_id: &str) -> Result<PipelineRun, GridError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM pipeline_runs r JOIN projects p ON r.project_id = p.id
             WHERE r.id = ?1 AND p.owner = ?2",
            RUN_COLUMNS
        ),
        params![run_id, user_id],
        run_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("pipeline run", run_id))
}

fn set_stage(
    store: &Store,
    user_id: &str,
    run_id: &str,
    stage: &str,
    status: StageStatus,
    output: &str,
) -> Result<(), GridError> {
    db::with_grid_tx(store, user_id, "pipeline.stage", |conn| {
        conn.execute(
            "UPDATE pipeline_stages SET status = ?1, output = ?2 WHERE run_id = ?3 AND stage = ?4",
            params![status.as_str(), output, run_id, stage],
        )?;
        Ok(())
    })
}

/// Call the capability for each stage in order and record the outcome.
/// Returns whether every stage succeeded.
fn run_stages(
    store: &Store,
    user_id: &str,
    capability: &dyn BuildCapability,
    run_id: &str,
    project_id: &str,
    prompt: &str,
) -> Result<bool, GridError> {
    let mut failed = false;
    for stage in STAGES {
        if failed {
            set_stage(store, user_id, run_id, stage, StageStatus::Skipped, "")?;
            continue;
        }
        let request = BuildRequest {
            project_id: project_id.to_string(),
            prompt: prompt.to_string(),
            stage: Some(stage.to_string()),
        };
        match capability.submit(&request) {
            Ok(reply) => set_stage(store, user_id, run_id, stage, StageStatus::Succeeded, &reply.summary)?,
            Err(e) => {
                failed = true;
                set_stage(store, user_id, run_id, stage, StageStatus::Failed, &e.to_string())?;
            }
        }
    }
    Ok(!failed)
}

/// Close a run. A failed run also marks its still-pending stages `skipped`.
fn finish_run(store: &Store, user_id: &str, run_id: &str, status: RunStatus) -> Result<RunReport, GridError> {
    db::with_grid_tx(store, user_id, "pipeline.finish", |conn| {
        conn.execute(
            "UPDATE pipeline_runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), time::now_epoch_z(), run_id],
        )?;
        if status == RunStatus::Failed {
            conn.execute(
                "UPDATE pipeline_stages SET status = ?1 WHERE run_id = ?2 AND status = ?3",
                params![StageStatus::Skipped.as_str(), run_id, StageStatus::Pending.as_str()],
            )?;
        }
        Ok(RunReport {
            run: owned_run_on(conn, user_id, run_id)?,
            stages: stages_on(conn, run_id)?,
        })
    })
}

/// Run `plan → generate → review → package` for a project.
///
/// Each stage is recorded as it completes. The first failure marks that stage and
/// the run `failed` and every later stage `skipped`. A capability error is a run
/// outcome, not an error of this call. If recording a stage fails, the run is
/// closed as `failed` and that error is returned.
pub fn start_pipeline(
    store: &Store,
    session: &Session,
    capability: &dyn BuildCapability,
    project_id: &str,
    prompt: &str,
) -> Result<RunReport, GridError> {
    let user_id = session.require_active()?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GridError::validation("prompt must not be empty"));
    }

    let run_id = db::with_grid_tx(store, user_id, "pipeline.start", |conn| {
        let project = owned_project_on(conn, user_id, project_id)?;
        if project.status == ProjectStatus::Archived {
            return Err(GridError::validation(format!("project '{}' is archived", project_id)));
        }
        let run_id = time::new_id();
        conn.execute(
            "INSERT INTO pipeline_runs(id, project_id, prompt, capability, status, created_by, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                project_id,
                prompt,
                capability.name(),
                RunStatus::Running.as_str(),
                user_id,
                time::now_epoch_z()
            ],
        )?;
        for (position, stage) in STAGES.iter().enumerate() {
            conn.execute(
                "INSERT INTO pipeline_stages(run_id, stage, position, status, output) VALUES(?1, ?2, ?3, ?4, '')",
                params![run_id, stage, position as i64, StageStatus::Pending.as_str()],
            )?;
        }
        Ok(run_id)
    })?;

    match run_stages(store, user_id, capability, &run_id, project_id, prompt) {
        Ok(true) => finish_run(store, user_id, &run_id, RunStatus::Succeeded),
        Ok(false) => finish_run(store, user_id, &run_id, RunStatus::Failed),
        Err(e) => {
            // Best effort; the recording error is the one reported.
            let _ = finish_run(store, user_id, &run_id, RunStatus::Failed);
            Err(e)
        }
    }
}

pub fn get_run(store: &Store, session: &Session, run_id: &str) -> Result<RunReport, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "pipeline.get", |conn| {
        Ok(RunReport {
            run: owned_run_on(conn, user_id, run_id)?,
            stages: stages_on(conn, run_id)?,
        })
    })
}

pub fn list_runs(store: &Store, session: &Session, project_id: &str) -> Result<Vec<PipelineRun>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "pipeline.list", |conn| {
        owned_project_on(conn, user_id, project_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pipeline_runs r WHERE r.project_id = ?1 ORDER BY r.created_at, r.rowid",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], run_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "pipeline", about = "Run and inspect build pipelines")]
pub struct PipelineCli {
    #[clap(subcommand)]
    pub command: PipelineCommand,
}

#[derive(Subcommand, Debug)]
pub enum PipelineCommand {
    /// Run all stages for a project.
    Run {
        #[clap(long)]
        project: String,
        #[clap(value_name = "PROMPT")]
        prompt: String,
    },
    /// Show a run and its stages.
    Show {
        #[clap(long)]
        id: String,
    },
    /// List runs of a project.
    List {
        #[clap(long)]
        project: String,
    },
}

fn render_report(report: &RunReport) -> String {
    let mut lines = vec![format!("run {} [{}]", report.run.id, report.run.status.as_str())];
    for s in &report.stages {
        lines.push(format!(
            "  {}. {:<8} {:<9} {}",
            s.position + 1,
            s.stage,
            s.status.as_str(),
            output::compact_line(&s.output, 80)
        ));
    }
    lines.join("\n")
}

pub fn run_pipeline_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: PipelineCli,
) -> Result<(), GridError> {
    match cli.command {
        PipelineCommand::Run { project, prompt } => {
            let capability = StubCapability::from_config(&config::load_config(&store.root)?.builder);
            let report = start_pipeline(store, session, &capability, &project, &prompt)?;
            output::emit(format, "pipeline.run", serde_json::to_value(&report)?, || render_report(&report));
        }
        PipelineCommand::Show { id } => {
            let report = get_run(store, session, &id)?;
            output::emit(format, "pipeline.show", serde_json::to_value(&report)?, || render_report(&report));
        }
        PipelineCommand::List { project } => {
            let runs = list_runs(store, session, &project)?;
            output::emit(format, "pipeline.list", serde_json::to_value(&runs)?, || {
                runs.iter()
                    .map(|r| format!("{}  [{}] {}", r.id, r.status.as_str(), output::compact_line(&r.prompt, 60)))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "pipeline",
        "version": "0.1.0",
        "description": "Fixed plan/generate/review/package stage runner",
        "stages": STAGES,
        "commands": [
            { "name": "run", "parameters": ["project", "prompt"] },
            { "name": "show", "parameters": ["id"] },
            { "name": "list", "parameters": ["project"] }
        ],
        "storage": ["grid.db:pipeline_runs", "grid.db:pipeline_stages"]
    })
}

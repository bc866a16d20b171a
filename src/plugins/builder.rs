//! App builder: projects, chat sessions and proposed change requests.
//!
//! Generation itself is behind [`BuildCapability`]. The crate ships only
//! [`StubCapability`], which answers with canned text after a configurable delay;
//! callers that have a real generator plug it in through the same trait.

use crate::core::config;
use crate::core::db;
use crate::core::error::GridError;
use crate::core::output::{self, OutputFormat};
use crate::core::store::{Session, Store};
use crate::core::time;
use crate::plugins::usage::{self, LimitKind};
use crate::plugins::workspace::clean_name;
use clap::{Parser, Subcommand};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub project_id: String,
    pub prompt: String,
    /// Pipeline stage being executed; `None` for chat turns.
    pub stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFile {
    pub path: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReply {
    pub summary: String,
    #[serde(default)]
    pub proposed_files: Vec<ProposedFile>,
}

/// Something that turns a prompt into a reply and, optionally, proposed files.
pub trait BuildCapability {
    fn name(&self) -> &str;
    fn submit(&self, request: &BuildRequest) -> Result<BuildReply, GridError>;
}

/// Canned generator for local use and tests. Never produces real code.
#[derive(Debug, Clone, Default)]
pub struct StubCapability {
    delay: Duration,
    fail_stage: Option<String>,
}

impl StubCapability {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_stage: None,
        }
    }

    pub fn from_config(cfg: &config::BuilderSection) -> Self {
        Self::new(Duration::from_millis(cfg.reply_delay_ms))
    }

    /// Make every request for `stage` fail; used to exercise pipeline failure paths.
    pub fn failing_at(mut self, stage: &str) -> Self {
        self.fail_stage = Some(stage.to_string());
        self
    }
}

impl BuildCapability for StubCapability {
    fn name(&self) -> &str {
        "stub"
    }

    fn submit(&self, request: &BuildRequest) -> Result<BuildReply, GridError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match request.stage.as_deref() {
            Some(stage) if self.fail_stage.as_deref() == Some(stage) => Err(GridError::validation(
                format!("stub capability configured to fail at stage '{}'", stage),
            )),
            Some(stage) => Ok(BuildReply {
                summary: format!("[stub] {} complete", stage),
                proposed_files: Vec::new(),
            }),
            None => Ok(BuildReply {
                summary: format!("[stub] Drafted changes for: {}", request.prompt.trim()),
                proposed_files: vec![
                    ProposedFile {
                        path: "src/App.tsx".to_string(),
                        action: "modify".to_string(),
                    },
                    ProposedFile {
                        path: "src/components/Generated.tsx".to_string(),
                        action: "create".to_string(),
                    },
                ],
            }),
        }
    }
}

// --- Projects ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }

    fn parse(raw: &str) -> Result<Self, GridError> {
        match raw {
            "active" => Ok(ProjectStatus::Active),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(GridError::validation(format!("unknown project status '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub created_at: String,
    pub updated_at: String,
}

const PROJECT_COLUMNS: &str = "id, owner, name, description, status, created_at, updated_at";

pub(crate) fn text_conversion(column: usize, e: GridError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn project_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let status: String = row.get(4)?;
    Ok(Project {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        status: ProjectStatus::parse(&status).map_err(|e| text_conversion(4, e))?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn owned_project_on(conn: &Connection, user_id: &str, project_id: &str) -> Result<Project, GridError> {
    conn.query_row(
        &format!("SELECT {} FROM projects WHERE id = ?1 AND owner = ?2", PROJECT_COLUMNS),
        params![project_id, user_id],
        project_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("project", project_id))
}

/// Create a project; fails with `LimitReached` once the plan's active-project quota is used.
pub fn create_project(
    store: &Store,
    session: &Session,
    name: &str,
    description: &str,
) -> Result<Project, GridError> {
    let user_id = session.require_active()?;
    let name = clean_name("project", name)?;
    let config = config::load_config(&store.root)?;
    db::with_grid_tx(store, user_id, "builder.project.create", |conn| {
        usage::ensure_can_create_on(conn, &config.default_plan, user_id, LimitKind::Projects)?;
        let now = time::now_epoch_z();
        let project = Project {
            id: time::new_id(),
            owner: user_id.to_string(),
            name,
            description: description.trim().to_string(),
            status: ProjectStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO projects(id, owner, name, description, status, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.id,
                project.owner,
                project.name,
                project.description,
                project.status.as_str(),
                project.created_at,
                project.updated_at
            ],
        )?;
        Ok(project)
    })
}

pub fn list_projects(store: &Store, session: &Session) -> Result<Vec<Project>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "builder.project.list", |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM projects WHERE owner = ?1 ORDER BY created_at, rowid",
            PROJECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], project_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

/// Archive a project. Archived projects stop counting against the project limit.
pub fn archive_project(store: &Store, session: &Session, project_id: &str) -> Result<Project, GridError> {
    let user_id = session.require_active()?;
    db::with_grid_tx(store, user_id, "builder.project.archive", |conn| {
        let mut project = owned_project_on(conn, user_id, project_id)?;
        if project.status == ProjectStatus::Archived {
            return Ok(project);
        }
        project.status = ProjectStatus::Archived;
        project.updated_at = time::now_epoch_z();
        conn.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![project.status.as_str(), project.updated_at, project.id],
        )?;
        Ok(project)
    })
}

// --- Chat sessions ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

fn owned_chat_on(conn: &Connection, user_id: &str, chat_id: &str) -> Result<ChatSession, GridError> {
    conn.query_row(
        "SELECT s.id, s.project_id, s.title, s.created_by, s.created_at
         FROM builder_sessions s JOIN projects p ON s.project_id = p.id
         WHERE s.id = ?1 AND p.owner = ?2",
        params![chat_id, user_id],
        |row| {
            Ok(ChatSession {
                id: row.get(0)?,
                project_id: row.get(1)?,
                title: row.get(2)?,
                created_by: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("chat session", chat_id))
}

fn insert_message_on(conn: &Connection, chat_id: &str, role: &str, content: &str) -> Result<Message, GridError> {
    let message = Message {
        id: time::new_id(),
        session_id: chat_id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        created_at: time::now_epoch_z(),
    };
    conn.execute(
        "INSERT INTO builder_messages(id, session_id, role, content, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
        params![message.id, message.session_id, message.role, message.content, message.created_at],
    )?;
    Ok(message)
}

pub fn create_chat(
    store: &Store,
    session: &Session,
    project_id: &str,
    title: &str,
) -> Result<ChatSession, GridError> {
    let user_id = session.require_active()?;
    let title = clean_name("chat", title)?;
    db::with_grid_tx(store, user_id, "builder.chat.create", |conn| {
        let project = owned_project_on(conn, user_id, project_id)?;
        if project.status == ProjectStatus::Archived {
            return Err(GridError::validation(format!("project '{}' is archived", project_id)));
        }
        let chat = ChatSession {
            id: time::new_id(),
            project_id: project_id.to_string(),
            title,
            created_by: user_id.to_string(),
            created_at: time::now_epoch_z(),
        };
        conn.execute(
            "INSERT INTO builder_sessions(id, project_id, title, created_by, created_at) VALUES(?1, ?2, ?3, ?4, ?5)",
            params![chat.id, chat.project_id, chat.title, chat.created_by, chat.created_at],
        )?;
        Ok(chat)
    })
}

pub fn list_messages(store: &Store, session: &Session, chat_id: &str) -> Result<Vec<Message>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "builder.chat.messages", |conn| {
        owned_chat_on(conn, user_id, chat_id)?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM builder_messages
             WHERE session_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(Message {
                id: row.get(0)?,
                session_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

// --- Change requests ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
        }
    }

    fn parse(raw: &str) -> Result<Self, GridError> {
        match raw {
            "pending" => Ok(ChangeStatus::Pending),
            "approved" => Ok(ChangeStatus::Approved),
            "rejected" => Ok(ChangeStatus::Rejected),
            other => Err(GridError::validation(format!("unknown change status '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChangeRequest {
    pub id: String,
    pub session_id: String,
    pub summary: String,
    pub files: Vec<ProposedFile>,
    pub status: ChangeStatus,
    pub created_at: String,
    pub decided_at: Option<String>,
    pub decided_by: Option<String>,
}

const CHANGE_COLUMNS: &str =
    "c.id, c.session_id, c.summary, c.files, c.status, c.created_at, c.decided_at, c.decided_by";

fn change_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeRequest> {
    let files: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(ChangeRequest {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary: row.get(2)?,
        files: serde_json::from_str(&files).map_err(|e| text_conversion(3, GridError::JsonError(e)))?,
        status: ChangeStatus::parse(&status).map_err(|e| text_conversion(4, e))?,
        created_at: row.get(5)?,
        decided_at: row.get(6)?,
        decided_by: row.get(7)?,
    })
}

/// Outcome of one chat turn.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptOutcome {
    pub user_message: Message,
    pub reply: Message,
    pub change: Option<ChangeRequest>,
}

/// Run one chat turn: store the prompt, ask `capability`, store its reply and, when
/// files are proposed, a `pending` change request.
///
/// The capability runs outside any database transaction; if it fails the user
/// message is still kept.
pub fn submit_prompt(
    store: &Store,
    session: &Session,
    capability: &dyn BuildCapability,
    chat_id: &str,
    prompt: &str,
) -> Result<PromptOutcome, GridError> {
    let user_id = session.require_active()?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(GridError::validation("prompt must not be empty"));
    }
    let (chat, user_message) = db::with_grid_tx(store, user_id, "builder.chat.prompt", |conn| {
        let chat = owned_chat_on(conn, user_id, chat_id)?;
        let message = insert_message_on(conn, chat_id, "user", prompt)?;
        Ok((chat, message))
    })?;

    let reply = capability.submit(&BuildRequest {
        project_id: chat.project_id.clone(),
        prompt: prompt.to_string(),
        stage: None,
    })?;

    db::with_grid_tx(store, user_id, "builder.chat.reply", |conn| {
        let reply_message = insert_message_on(conn, chat_id, "assistant", &reply.summary)?;
        let change = if reply.proposed_files.is_empty() {
            None
        } else {
            let change = ChangeRequest {
                id: time::new_id(),
                session_id: chat_id.to_string(),
                summary: reply.summary.clone(),
                files: reply.proposed_files.clone(),
                status: ChangeStatus::Pending,
                created_at: time::now_epoch_z(),
                decided_at: None,
                decided_by: None,
            };
            conn.execute(
                "INSERT INTO change_requests(id, session_id, summary, files, status, created_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    change.id,
                    change.session_id,
                    change.summary,
                    serde_json::to_string(&change.files)?,
                    change.status.as_str(),
                    change.created_at
                ],
            )?;
            Some(change)
        };
        Ok(PromptOutcome {
            user_message,
            reply: reply_message,
            change,
        })
    })
}

fn owned_change_on(conn: &Connection, user_id: &str, change_id: &str) -> Result<ChangeRequest, GridError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM change_requests c
             JOIN builder_sessions s ON c.session_id = s.id
             JOIN projects p ON s.project_id = p.id
             WHERE c.id = ?1 AND p.owner = ?2",
            CHANGE_COLUMNS
        ),
        params![change_id, user_id],
        change_from_row,
    )
    .optional()?
    .ok_or_else(|| GridError::not_found("change request", change_id))
}

fn decide_change(
    store: &Store,
    session: &Session,
    change_id: &str,
    decision: ChangeStatus,
) -> Result<ChangeRequest, GridError> {
    let user_id = session.require_active()?;
    let op = match decision {
        ChangeStatus::Approved => "builder.change.approve",
        _ => "builder.change.reject",
    };
    db::with_grid_tx(store, user_id, op, |conn| {
        let mut change = owned_change_on(conn, user_id, change_id)?;
        if change.status != ChangeStatus::Pending {
            return Err(GridError::validation(format!(
                "change request '{}' is already {}",
                change_id,
                change.status.as_str()
            )));
        }
        change.status = decision;
        change.decided_at = Some(time::now_epoch_z());
        change.decided_by = Some(user_id.to_string());
        conn.execute(
            "UPDATE change_requests SET status = ?1, decided_at = ?2, decided_by = ?3 WHERE id = ?4",
            params![change.status.as_str(), change.decided_at, change.decided_by, change.id],
        )?;
        Ok(change)
    })
}

/// Mark a pending change as approved. Only the status changes; nothing is applied.
pub fn approve_change(store: &Store, session: &Session, change_id: &str) -> Result<ChangeRequest, GridError> {
    decide_change(store, session, change_id, ChangeStatus::Approved)
}

pub fn reject_change(store: &Store, session: &Session, change_id: &str) -> Result<ChangeRequest, GridError> {
    decide_change(store, session, change_id, ChangeStatus::Rejected)
}

pub fn list_changes(store: &Store, session: &Session, chat_id: &str) -> Result<Vec<ChangeRequest>, GridError> {
    let user_id = session.require_active()?;
    db::with_grid(store, user_id, "builder.change.list", |conn| {
        owned_chat_on(conn, user_id, chat_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM change_requests c WHERE c.session_id = ?1 ORDER BY c.created_at, c.rowid",
            CHANGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![chat_id], change_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    })
}

#[derive(Parser, Debug)]
#[clap(name = "builder", about = "Projects, builder chats and change requests")]
pub struct BuilderCli {
    #[clap(subcommand)]
    pub command: BuilderCommand,
}

#[derive(Subcommand, Debug)]
pub enum BuilderCommand {
    /// Create a project (checked against the plan's project limit).
    ProjectCreate {
        #[clap(value_name = "NAME")]
        name: String,
        #[clap(long, default_value = "")]
        description: String,
    },
    /// List your projects.
    ProjectList,
    /// Archive a project.
    ProjectArchive {
        #[clap(long)]
        id: String,
        #[clap(long)]
        yes: bool,
    },
    /// Open a chat session on a project.
    Chat {
        #[clap(long)]
        project: String,
        #[clap(long, default_value = "New chat")]
        title: String,
    },
    /// Send a prompt to the builder.
    Prompt {
        #[clap(long)]
        chat: String,
        #[clap(value_name = "PROMPT")]
        prompt: String,
    },
    /// Show a chat transcript.
    Messages {
        #[clap(long)]
        chat: String,
    },
    /// List change requests of a chat.
    Changes {
        #[clap(long)]
        chat: String,
    },
    /// Approve a pending change request.
    Approve {
        #[clap(long)]
        id: String,
    },
    /// Reject a pending change request.
    Reject {
        #[clap(long)]
        id: String,
    },
}

pub fn run_builder_cli(
    store: &Store,
    session: &Session,
    format: OutputFormat,
    cli: BuilderCli,
) -> Result<(), GridError> {
    match cli.command {
        BuilderCommand::ProjectCreate { name, description } => {
            let project = create_project(store, session, &name, &description)?;
            output::emit(format, "builder.project.create", serde_json::to_value(&project)?, || {
                format!("Created project {} ({})", project.name, project.id)
            });
        }
        BuilderCommand::ProjectList => {
            let projects = list_projects(store, session)?;
            output::emit(format, "builder.project.list", serde_json::to_value(&projects)?, || {
                projects
                    .iter()
                    .map(|p| format!("{}  [{}] {}", p.id, p.status.as_str(), p.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        BuilderCommand::ProjectArchive { id, yes } => {
            crate::require_confirmation(yes, "project archive")?;
            let project = archive_project(store, session, &id)?;
            output::emit(format, "builder.project.archive", serde_json::to_value(&project)?, || {
                format!("Archived project {}", project.name)
            });
        }
        BuilderCommand::Chat { project, title } => {
            let chat = create_chat(store, session, &project, &title)?;
            output::emit(format, "builder.chat", serde_json::to_value(&chat)?, || {
                format!("Opened chat {} ({})", chat.title, chat.id)
            });
        }
        BuilderCommand::Prompt { chat, prompt } => {
            let capability = StubCapability::from_config(&config::load_config(&store.root)?.builder);
            let outcome = submit_prompt(store, session, &capability, &chat, &prompt)?;
            output::emit(format, "builder.prompt", serde_json::to_value(&outcome)?, || {
                let mut text = format!("assistant: {}", outcome.reply.content);
                if let Some(change) = &outcome.change {
                    text.push_str(&format!(
                        "\npending change {} ({} files)",
                        change.id,
                        change.files.len()
                    ));
                }
                text
            });
        }
        BuilderCommand::Messages { chat } => {
            let messages = list_messages(store, session, &chat)?;
            output::emit(format, "builder.messages", serde_json::to_value(&messages)?, || {
                messages
                    .iter()
                    .map(|m| format!("{}: {}", m.role, output::compact_line(&m.content, 120)))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        BuilderCommand::Changes { chat } => {
            let changes = list_changes(store, session, &chat)?;
            output::emit(format, "builder.changes", serde_json::to_value(&changes)?, || {
                changes
                    .iter()
                    .map(|c| format!("{}  [{}] {}", c.id, c.status.as_str(), c.summary))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        BuilderCommand::Approve { id } => {
            let change = approve_change(store, session, &id)?;
            output::emit(format, "builder.approve", serde_json::to_value(&change)?, || {
                format!("Approved change {}", change.id)
            });
        }
        BuilderCommand::Reject { id } => {
            let change = reject_change(store, session, &id)?;
            output::emit(format, "builder.reject", serde_json::to_value(&change)?, || {
                format!("Rejected change {}", change.id)
            });
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "builder",
        "version": "0.1.0",
        "description": "Chat-driven app builder over a pluggable generation capability",
        "commands": [
            { "name": "project-create", "parameters": ["name", "description"] },
            { "name": "project-list" },
            { "name": "project-archive", "parameters": ["id", "yes"] },
            { "name": "chat", "parameters": ["project", "title"] },
            { "name": "prompt", "parameters": ["chat", "prompt"] },
            { "name": "messages", "parameters": ["chat"] },
            { "name": "changes", "parameters": ["chat"] },
            { "name": "approve", "parameters": ["id"] },
            { "name": "reject", "parameters": ["id"] }
        ],
        "change_status": ["pending", "approved", "rejected"],
        "storage": ["grid.db:projects", "grid.db:builder_sessions", "grid.db:builder_messages", "grid.db:change_requests"]
    })
}

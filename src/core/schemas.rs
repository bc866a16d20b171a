//! Centralized database schema definitions.
//!
//! All state lives in one SQLite database, `grid.db`. Ownership flows downwards
//! (workspace → base → table → field/record) and every child row is declared with
//! `ON DELETE CASCADE`, so deleting a parent never leaves children behind.

pub const GRID_DB_NAME: &str = "grid.db";

// --- Grid model ---

pub const WORKSPACES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS workspaces (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";
pub const WORKSPACES_OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_workspaces_owner ON workspaces(owner)";

pub const BASES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS bases (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        icon TEXT NOT NULL DEFAULT 'database',
        color TEXT NOT NULL DEFAULT 'blue',
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE
    )
";
pub const BASES_WORKSPACE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_bases_workspace ON bases(workspace_id)";

// order_index is kept dense ({0..n-1}) by core::ordering, not by a constraint:
// moves rewrite several rows inside one transaction.
pub const TABLES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS grid_tables (
        id TEXT PRIMARY KEY,
        base_id TEXT NOT NULL,
        name TEXT NOT NULL,
        order_index INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(base_id) REFERENCES bases(id) ON DELETE CASCADE
    )
";
pub const TABLES_BASE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tables_base ON grid_tables(base_id, order_index)";

pub const FIELDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS fields (
        id TEXT PRIMARY KEY,
        table_id TEXT NOT NULL,
        name TEXT NOT NULL,
        field_type TEXT NOT NULL,
        options TEXT NOT NULL DEFAULT '{}', -- JSON FieldOptions
        order_index INTEGER NOT NULL,
        required INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(table_id) REFERENCES grid_tables(id) ON DELETE CASCADE
    )
";
pub const FIELDS_TABLE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_fields_table ON fields(table_id, order_index)";

pub const RECORDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        table_id TEXT NOT NULL,
        data TEXT NOT NULL, -- JSON map field_id -> CellValue
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(table_id) REFERENCES grid_tables(id) ON DELETE CASCADE
    )
";
pub const RECORDS_TABLE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_table ON records(table_id, created_at)";

// --- Plans and usage ---

pub const PLANS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS subscription_plans (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        max_projects INTEGER NOT NULL, -- -1 = unlimited
        max_bases INTEGER NOT NULL,
        max_records_per_base INTEGER NOT NULL,
        max_storage_mb INTEGER NOT NULL,
        features TEXT NOT NULL DEFAULT '[]' -- JSON array
    )
";

pub const USER_SUBSCRIPTIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_subscriptions (
        user_id TEXT PRIMARY KEY,
        plan_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        started_at TEXT NOT NULL,
        FOREIGN KEY(plan_id) REFERENCES subscription_plans(id)
    )
";

// --- Builder ---

pub const PROJECTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active', -- active, archived
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const BUILDER_SESSIONS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS builder_sessions (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
    )
";

pub const BUILDER_MESSAGES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS builder_messages (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        role TEXT NOT NULL, -- user, assistant
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(session_id) REFERENCES builder_sessions(id) ON DELETE CASCADE
    )
";

pub const CHANGE_REQUESTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS change_requests (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        summary TEXT NOT NULL,
        files TEXT NOT NULL DEFAULT '[]', -- JSON array of ProposedFile
        status TEXT NOT NULL DEFAULT 'pending', -- pending, approved, rejected
        created_at TEXT NOT NULL,
        decided_at TEXT,
        decided_by TEXT,
        FOREIGN KEY(session_id) REFERENCES builder_sessions(id) ON DELETE CASCADE
    )
";

pub const PIPELINE_RUNS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pipeline_runs (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        prompt TEXT NOT NULL,
        capability TEXT NOT NULL,
        status TEXT NOT NULL, -- running, succeeded, failed
        created_by TEXT NOT NULL,
        created_at TEXT NOT NULL,
        finished_at TEXT,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
    )
";

pub const PIPELINE_STAGES_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pipeline_stages (
        run_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        position INTEGER NOT NULL,
        status TEXT NOT NULL, -- pending, succeeded, failed, skipped
        output TEXT NOT NULL DEFAULT '',
        PRIMARY KEY(run_id, stage),
        FOREIGN KEY(run_id) REFERENCES pipeline_runs(id) ON DELETE CASCADE
    )
";

pub const BLUEPRINT_INSTALLS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blueprint_installs (
        id TEXT PRIMARY KEY,
        blueprint_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        base_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        checksum TEXT NOT NULL, -- sha256 of the blueprint JSON
        installed_at TEXT NOT NULL,
        FOREIGN KEY(workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
        FOREIGN KEY(base_id) REFERENCES bases(id) ON DELETE CASCADE
    )
";

/// Every statement run by `initialize_grid_db`, parents before children.
pub const GRID_DB_SCHEMA: &[&str] = &[
    WORKSPACES_SCHEMA,
    WORKSPACES_OWNER_INDEX,
    BASES_SCHEMA,
    BASES_WORKSPACE_INDEX,
    TABLES_SCHEMA,
    TABLES_BASE_INDEX,
    FIELDS_SCHEMA,
    FIELDS_TABLE_INDEX,
    RECORDS_SCHEMA,
    RECORDS_TABLE_INDEX,
    PLANS_SCHEMA,
    USER_SUBSCRIPTIONS_SCHEMA,
    PROJECTS_SCHEMA,
    BUILDER_SESSIONS_SCHEMA,
    BUILDER_MESSAGES_SCHEMA,
    CHANGE_REQUESTS_SCHEMA,
    PIPELINE_RUNS_SCHEMA,
    PIPELINE_STAGES_SCHEMA,
    BLUEPRINT_INSTALLS_SCHEMA,
];

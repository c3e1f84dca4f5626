//! Database schema
//!
//! Business entities, per-model binding tables, scan watermarks and the job
//! queue share one database. Advisory locks live in a companion database (see
//! [`LOCKS_SCHEMA`]) so lock traffic never waits on the data write lock.

use crate::Result;
use rusqlite::Connection;

pub const DATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    login TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    manager_id INTEGER REFERENCES users(id),
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    project_id INTEGER REFERENCES projects(id),
    parent_id INTEGER REFERENCES tasks(id),
    epic_id INTEGER REFERENCES tasks(id),
    user_id INTEGER REFERENCES users(id),
    stage TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS worklogs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    date TEXT NOT NULL,
    unit_amount REAL NOT NULL DEFAULT 0,
    project_id INTEGER REFERENCES projects(id),
    task_id INTEGER REFERENCES tasks(id),
    user_id INTEGER REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS issue_type_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    external_id TEXT,
    external_updated_at INTEGER,
    name TEXT NOT NULL DEFAULT '',
    description TEXT,
    subtask INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS organization_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    external_id TEXT,
    external_updated_at INTEGER,
    name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS project_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    external_id TEXT,
    external_updated_at INTEGER,
    sync_action TEXT NOT NULL DEFAULT 'link' CHECK (sync_action IN ('link', 'export')),
    jira_key TEXT,
    project_type TEXT
);

CREATE TABLE IF NOT EXISTS project_binding_issue_types (
    project_binding_id INTEGER NOT NULL REFERENCES project_bindings(id) ON DELETE CASCADE,
    issue_type_binding_id INTEGER NOT NULL REFERENCES issue_type_bindings(id) ON DELETE CASCADE,
    PRIMARY KEY (project_binding_id, issue_type_binding_id)
);

CREATE TABLE IF NOT EXISTS user_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    external_id TEXT,
    external_updated_at INTEGER
);

CREATE TABLE IF NOT EXISTS task_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    external_id TEXT,
    external_updated_at INTEGER,
    jira_key TEXT,
    issue_type_binding_id INTEGER REFERENCES issue_type_bindings(id) ON DELETE SET NULL,
    project_binding_id INTEGER REFERENCES project_bindings(id) ON DELETE SET NULL,
    parent_binding_id INTEGER REFERENCES task_bindings(id) ON DELETE SET NULL,
    epic_binding_id INTEGER REFERENCES task_bindings(id) ON DELETE SET NULL,
    status TEXT
);

CREATE TABLE IF NOT EXISTS worklog_bindings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    worklog_id INTEGER NOT NULL REFERENCES worklogs(id) ON DELETE CASCADE,
    external_id TEXT,
    external_updated_at INTEGER,
    jira_issue_id TEXT,
    jira_issue_key TEXT,
    jira_issue_type_id TEXT,
    jira_epic_key TEXT
);

CREATE TABLE IF NOT EXISTS sync_timestamps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backend_id TEXT NOT NULL,
    scan_name TEXT NOT NULL,
    scan_kind TEXT NOT NULL,
    last_timestamp INTEGER NOT NULL DEFAULT 0,
    UNIQUE (backend_id, scan_name, scan_kind)
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    description TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 10,
    eta INTEGER,
    state TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 5,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_issue_type_bindings_ext
    ON issue_type_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_organization_bindings_ext
    ON organization_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_project_bindings_ext
    ON project_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_project_bindings_export
    ON project_bindings(backend_id, project_id) WHERE sync_action = 'export';
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_bindings_ext
    ON user_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_bindings_local
    ON user_bindings(backend_id, user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_task_bindings_ext
    ON task_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_task_bindings_local
    ON task_bindings(backend_id, task_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_worklog_bindings_ext
    ON worklog_bindings(backend_id, external_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_worklog_bindings_local
    ON worklog_bindings(backend_id, worklog_id);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(state, priority, eta);
"#;

pub const LOCKS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS advisory_locks (
    key TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

pub fn init_data_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(DATA_SCHEMA)?;
    Ok(())
}

pub fn init_locks_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(LOCKS_SCHEMA)?;
    Ok(())
}

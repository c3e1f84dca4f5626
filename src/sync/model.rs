//! Synchronized entity types and where their state lives

use crate::storage::{BindingTable, EntityTable};
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity types the connector synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    Project,
    Task,
    IssueType,
    User,
    Worklog,
    Organization,
}

impl Model {
    pub const ALL: [Model; 6] = [
        Model::Project,
        Model::Task,
        Model::IssueType,
        Model::User,
        Model::Worklog,
        Model::Organization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Model::Project => "project",
            Model::Task => "task",
            Model::IssueType => "issue_type",
            Model::User => "user",
            Model::Worklog => "worklog",
            Model::Organization => "organization",
        }
    }

    pub fn bindings(&self) -> BindingTable {
        match self {
            Model::Project => BindingTable {
                table: "project_bindings",
                local_column: Some("project_id"),
            },
            Model::Task => BindingTable {
                table: "task_bindings",
                local_column: Some("task_id"),
            },
            Model::IssueType => BindingTable {
                table: "issue_type_bindings",
                local_column: None,
            },
            Model::User => BindingTable {
                table: "user_bindings",
                local_column: Some("user_id"),
            },
            Model::Worklog => BindingTable {
                table: "worklog_bindings",
                local_column: Some("worklog_id"),
            },
            Model::Organization => BindingTable {
                table: "organization_bindings",
                local_column: None,
            },
        }
    }

    /// Local entity table; `None` for standalone models
    pub fn entity(&self) -> Option<EntityTable> {
        match self {
            Model::Project => Some(EntityTable::PROJECTS),
            Model::Task => Some(EntityTable::TASKS),
            Model::User => Some(EntityTable::USERS),
            Model::Worklog => Some(EntityTable::WORKLOGS),
            Model::IssueType | Model::Organization => None,
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.entity().is_none()
    }

    /// Advisory lock key serializing imports of one remote record
    pub fn import_lock_key(&self, backend_id: &str, external_id: &str) -> String {
        format!("import:{}:{}:{}", backend_id, self.as_str(), external_id)
    }

    /// Advisory lock key serializing exports of one binding
    pub fn binding_lock_key(&self, binding_id: i64) -> String {
        format!("binding:{}:{}", self.as_str(), binding_id)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "project" | "projects" => Ok(Model::Project),
            "task" | "tasks" | "issue" | "issues" => Ok(Model::Task),
            "issue_type" | "issue_types" | "issuetype" => Ok(Model::IssueType),
            "user" | "users" => Ok(Model::User),
            "worklog" | "worklogs" => Ok(Model::Worklog),
            "organization" | "organizations" => Ok(Model::Organization),
            other => Err(SyncError::Config(format!("Unknown model: {}", other))),
        }
    }
}

//! Mappers: pure record transformations between Jira and local field sets
//!
//! Direct mappings (a JSON pointer into the remote payload renamed to a local
//! column) are applied first; computed mappings then add values that need
//! resolved references. Callers resolve references (bindings, users) and
//! hand them in, so nothing here touches the store or the network.
//!
//! A required reference that could not be resolved is a
//! [`SyncError::Mapping`]: defaulting it would attribute data to the wrong
//! owner.

use crate::config::WorklogTimezone;
use crate::integrations::{
    ProjectRequest, RemoteIssue, RemoteIssueType, RemoteOrganization, RemoteProject, RemoteWorklog,
};
use crate::storage::FieldValues;
use crate::{Result, SyncError};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Output of an import mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    /// Columns of the local record
    pub local: FieldValues,
    /// Model specific columns of the binding row
    pub binding: FieldValues,
}

/// Remote JSON pointer → local column
pub type DirectMapping = (&'static str, &'static str);

const ISSUE_TYPE_DIRECT: &[DirectMapping] = &[
    ("/name", "name"),
    ("/description", "description"),
    ("/subtask", "subtask"),
];

const ORGANIZATION_DIRECT: &[DirectMapping] = &[("/name", "name")];

const PROJECT_BINDING_DIRECT: &[DirectMapping] =
    &[("/key", "jira_key"), ("/projectTypeKey", "project_type")];

const TASK_DIRECT: &[DirectMapping] = &[
    ("/fields/summary", "name"),
    ("/fields/description", "description"),
    ("/fields/status/name", "stage"),
];

const TASK_BINDING_DIRECT: &[DirectMapping] =
    &[("/key", "jira_key"), ("/fields/status/name", "status")];

/// Apply direct mappings to a serializable remote record
///
/// Missing paths map to `null` so a value cleared in Jira is cleared locally.
pub fn apply_direct<T: Serialize>(raw: &T, mappings: &[DirectMapping]) -> Result<FieldValues> {
    let value = serde_json::to_value(raw)?;
    Ok(mappings
        .iter()
        .map(|(pointer, column)| (*column, value.pointer(pointer).cloned().unwrap_or(Value::Null)))
        .collect())
}

pub fn map_issue_type(raw: &RemoteIssueType) -> Result<MappedRecord> {
    Ok(MappedRecord {
        local: FieldValues::new(),
        binding: apply_direct(raw, ISSUE_TYPE_DIRECT)?,
    })
}

pub fn map_organization(raw: &RemoteOrganization) -> Result<MappedRecord> {
    Ok(MappedRecord {
        local: FieldValues::new(),
        binding: apply_direct(raw, ORGANIZATION_DIRECT)?,
    })
}

/// Linked projects are owned locally; only the binding follows Jira
pub fn map_project(raw: &RemoteProject) -> Result<MappedRecord> {
    Ok(MappedRecord {
        local: FieldValues::new(),
        binding: apply_direct(raw, PROJECT_BINDING_DIRECT)?,
    })
}

/// References of a task resolved by the importer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskLinks {
    pub project_binding_id: i64,
    pub project_id: i64,
    pub issue_type_binding_id: Option<i64>,
    pub parent_binding_id: Option<i64>,
    pub parent_task_id: Option<i64>,
    pub epic_binding_id: Option<i64>,
    pub epic_task_id: Option<i64>,
    pub user_id: Option<i64>,
}

pub fn map_task(raw: &RemoteIssue, links: &TaskLinks) -> Result<MappedRecord> {
    let mut local = apply_direct(raw, TASK_DIRECT)?;
    local
        .set("project_id", links.project_id)
        .set_opt("parent_id", links.parent_task_id)
        .set_opt("epic_id", links.epic_task_id)
        .set_opt("user_id", links.user_id)
        .set("active", true);

    let mut binding = apply_direct(raw, TASK_BINDING_DIRECT)?;
    binding
        .set("project_binding_id", links.project_binding_id)
        .set_opt("issue_type_binding_id", links.issue_type_binding_id)
        .set_opt("parent_binding_id", links.parent_binding_id)
        .set_opt("epic_binding_id", links.epic_binding_id);

    Ok(MappedRecord { local, binding })
}

/// References of a worklog resolved by the importer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorklogLinks {
    pub user_id: Option<i64>,
    pub task_id: Option<i64>,
    pub project_id: Option<i64>,
    pub issue_key: Option<String>,
    pub issue_type_id: Option<String>,
    pub epic_key: Option<String>,
}

/// Date policy of worklog imports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorklogDatePolicy {
    pub timezone: WorklogTimezone,
    pub offset: Option<FixedOffset>,
}

impl WorklogDatePolicy {
    pub fn date_of(&self, started: DateTime<FixedOffset>) -> Result<NaiveDate> {
        match self.timezone {
            WorklogTimezone::Naive => Ok(started.date_naive()),
            WorklogTimezone::Utc => Ok(started.with_timezone(&Utc).date_naive()),
            WorklogTimezone::Fixed => {
                let offset = self.offset.ok_or_else(|| {
                    SyncError::Config("fixed worklog timezone requires an offset".to_string())
                })?;
                Ok(started.with_timezone(&offset).date_naive())
            }
        }
    }
}

pub fn map_worklog(
    raw: &RemoteWorklog,
    links: &WorklogLinks,
    dates: &WorklogDatePolicy,
) -> Result<MappedRecord> {
    let author = raw.author.as_ref().ok_or_else(|| {
        SyncError::Mapping(format!("worklog {} has no author", raw.id))
    })?;
    let user_id = links.user_id.ok_or_else(|| {
        SyncError::Mapping(format!(
            "no local user matches the author {} ({}) of worklog {}",
            author.display_name, author.account_id, raw.id
        ))
    })?;

    let name = raw
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("/");
    let date = dates.date_of(raw.started_at()?)?;

    let mut local = FieldValues::new();
    local
        .set("name", name)
        .set("date", date.format("%Y-%m-%d").to_string())
        .set("unit_amount", raw.time_spent_seconds as f64 / 3600.0)
        .set("user_id", user_id)
        .set_opt("task_id", links.task_id)
        .set_opt("project_id", links.project_id);

    let mut binding = FieldValues::new();
    binding
        .set("jira_issue_id", raw.issue_id.clone())
        .set_opt("jira_issue_key", links.issue_key.clone())
        .set_opt("jira_issue_type_id", links.issue_type_id.clone())
        .set_opt("jira_epic_key", links.epic_key.clone());

    Ok(MappedRecord { local, binding })
}

/// References of a task export resolved by the exporter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskExportLinks {
    pub project_external_id: String,
    pub issue_type_external_id: String,
    pub parent_external_id: Option<String>,
}

/// Jira `fields` of a task export, restricted to `only` when not empty
pub fn task_to_remote(local: &FieldValues, links: &TaskExportLinks, only: &[String]) -> Value {
    let wanted = |column: &str| only.is_empty() || only.iter().any(|c| c == column);
    let mut fields = Map::new();

    if wanted("name") {
        fields.insert(
            "summary".to_string(),
            local.get("name").cloned().unwrap_or(Value::Null),
        );
    }
    if wanted("description") {
        fields.insert(
            "description".to_string(),
            local.get("description").cloned().unwrap_or(Value::Null),
        );
    }
    fields.insert("project".to_string(), json!({ "id": links.project_external_id }));
    fields.insert(
        "issuetype".to_string(),
        json!({ "id": links.issue_type_external_id }),
    );
    if let Some(parent) = &links.parent_external_id {
        fields.insert("parent".to_string(), json!({ "id": parent }));
    }

    Value::Object(fields)
}

pub fn project_to_remote(
    local: &FieldValues,
    key: &str,
    project_type: &str,
    lead_account_id: &str,
) -> Result<ProjectRequest> {
    let name = local
        .get_str("name")
        .ok_or_else(|| SyncError::Mapping("project has no name".to_string()))?;
    Ok(ProjectRequest {
        key: key.to_string(),
        name: name.to_string(),
        project_type_key: project_type.to_string(),
        lead_account_id: lead_account_id.to_string(),
        description: local.get_str("description").map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::parse_jira_datetime;

    fn issue() -> RemoteIssue {
        serde_json::from_value(json!({
            "id": "10001",
            "key": "TEST-1",
            "fields": {
                "summary": "Write docs",
                "issuetype": {"id": "10002", "name": "Task"},
                "project": {"id": "10000", "key": "TEST"},
                "status": {"name": "In Progress"}
            }
        }))
        .unwrap()
    }

    fn worklog(comment: Option<&str>, author: bool) -> RemoteWorklog {
        let mut raw = json!({
            "id": "10400",
            "issueId": "10001",
            "started": "2019-04-08T23:30:00.000+0200",
            "timeSpentSeconds": 5400,
            "updated": "2019-04-08T23:40:00.000+0200"
        });
        if let Some(c) = comment {
            raw["comment"] = json!(c);
        }
        if author {
            raw["author"] = json!({"accountId": "abc", "displayName": "Ann"});
        }
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_task_mapping() {
        let links = TaskLinks {
            project_binding_id: 3,
            project_id: 1,
            issue_type_binding_id: Some(2),
            user_id: Some(5),
            ..Default::default()
        };
        let mapped = map_task(&issue(), &links).unwrap();

        assert_eq!(mapped.local.get_str("name"), Some("Write docs"));
        assert_eq!(mapped.local.get_str("stage"), Some("In Progress"));
        assert_eq!(mapped.local.get("description"), Some(&Value::Null));
        assert_eq!(mapped.local.get_i64("project_id"), Some(1));
        assert_eq!(mapped.local.get("parent_id"), Some(&Value::Null));
        assert_eq!(mapped.binding.get_str("jira_key"), Some("TEST-1"));
        assert_eq!(mapped.binding.get_i64("issue_type_binding_id"), Some(2));
    }

    #[test]
    fn test_worklog_mapping() {
        let links = WorklogLinks {
            user_id: Some(5),
            task_id: Some(9),
            project_id: Some(1),
            ..Default::default()
        };
        let dates = WorklogDatePolicy {
            timezone: WorklogTimezone::Naive,
            offset: None,
        };
        let mapped = map_worklog(&worklog(None, true), &links, &dates).unwrap();

        assert_eq!(mapped.local.get_str("name"), Some("/"));
        assert_eq!(mapped.local.get_str("date"), Some("2019-04-08"));
        assert_eq!(mapped.local.get("unit_amount"), Some(&json!(1.5)));
        assert_eq!(mapped.binding.get_str("jira_issue_id"), Some("10001"));

        let mapped = map_worklog(&worklog(Some("  Review "), true), &links, &dates).unwrap();
        assert_eq!(mapped.local.get_str("name"), Some("Review"));
    }

    #[test]
    fn test_worklog_without_user_is_a_mapping_error() {
        let dates = WorklogDatePolicy {
            timezone: WorklogTimezone::Naive,
            offset: None,
        };
        let err = map_worklog(&worklog(None, true), &WorklogLinks::default(), &dates).unwrap_err();
        assert!(matches!(err, SyncError::Mapping(_)));

        let err = map_worklog(&worklog(None, false), &WorklogLinks::default(), &dates).unwrap_err();
        assert!(matches!(err, SyncError::Mapping(_)));
    }

    #[test]
    fn test_worklog_date_policies() {
        let started = parse_jira_datetime("2019-04-08T23:30:00.000+0200").unwrap();
        let naive = WorklogDatePolicy {
            timezone: WorklogTimezone::Naive,
            offset: None,
        };
        let utc = WorklogDatePolicy {
            timezone: WorklogTimezone::Utc,
            offset: None,
        };
        let fixed = WorklogDatePolicy {
            timezone: WorklogTimezone::Fixed,
            offset: FixedOffset::east_opt(5 * 3600),
        };

        assert_eq!(naive.date_of(started).unwrap().to_string(), "2019-04-08");
        assert_eq!(utc.date_of(started).unwrap().to_string(), "2019-04-08");
        assert_eq!(fixed.date_of(started).unwrap().to_string(), "2019-04-09");
    }

    #[test]
    fn test_task_export_fields() {
        let local = FieldValues::new()
            .with("name", "Write docs")
            .with("description", "All of them");
        let links = TaskExportLinks {
            project_external_id: "10000".to_string(),
            issue_type_external_id: "10002".to_string(),
            parent_external_id: None,
        };

        let all = task_to_remote(&local, &links, &[]);
        assert_eq!(all["summary"], "Write docs");
        assert_eq!(all["project"]["id"], "10000");
        assert!(all.get("parent").is_none());

        let only_name = task_to_remote(&local, &links, &["name".to_string()]);
        assert!(only_name.get("description").is_none());
    }
}

//! Raw Jira payloads as returned by the REST API (v2)

use crate::{Result, SyncError};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

/// Jira returns some identifiers as numbers and others as strings
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUser {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(rename = "emailAddress", default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssueType {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subtask: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProject {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead: Option<RemoteUser>,
    #[serde(rename = "projectTypeKey", default, skip_serializing_if = "Option::is_none")]
    pub project_type_key: Option<String>,
    #[serde(rename = "issueTypes", default)]
    pub issue_types: Vec<RemoteIssueType>,
}

/// Project reference embedded in an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueStatus {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentFields {
    #[serde(rename = "issuetype", default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<RemoteIssueType>,
}

/// Parent reference embedded in a sub-task (or a child of a next-gen epic)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueParent {
    pub id: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<ParentFields>,
}

impl IssueParent {
    pub fn is_epic(&self) -> bool {
        self.fields
            .as_ref()
            .and_then(|f| f.issue_type.as_ref())
            .is_some_and(|t| t.name.eq_ignore_ascii_case("epic"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "issuetype")]
    pub issue_type: RemoteIssueType,
    pub project: ProjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IssueStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<RemoteUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<IssueParent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Custom fields (epic link, epic name, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: String,
    pub key: String,
    pub fields: IssueFields,
}

impl RemoteIssue {
    /// Key of the epic this issue belongs to
    ///
    /// Classic projects store it in the configured epic link custom field,
    /// next-gen projects make the epic the issue's parent.
    pub fn epic_key(&self, epic_link_field: &str) -> Option<String> {
        if let Some(Value::String(key)) = self.fields.extra.get(epic_link_field) {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        self.fields
            .parent
            .as_ref()
            .filter(|p| p.is_epic())
            .map(|p| p.key.clone())
    }

    /// Parent issue that is not an epic (sub-task relation)
    pub fn parent_key(&self) -> Option<&str> {
        self.fields
            .parent
            .as_ref()
            .filter(|p| !p.is_epic())
            .map(|p| p.key.as_str())
    }

    pub fn is_epic(&self) -> bool {
        self.fields.issue_type.name.eq_ignore_ascii_case("epic")
    }

    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.fields
            .updated
            .as_deref()
            .map(|s| parse_jira_datetime(s).map(|d| d.with_timezone(&Utc)))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteWorklog {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "issueId", deserialize_with = "string_or_number")]
    pub issue_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<RemoteUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub started: String,
    #[serde(rename = "timeSpentSeconds")]
    pub time_spent_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl RemoteWorklog {
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.updated
            .as_deref()
            .map(|s| parse_jira_datetime(s).map(|d| d.with_timezone(&Utc)))
            .transpose()
    }

    pub fn started_at(&self) -> Result<DateTime<FixedOffset>> {
        parse_jira_datetime(&self.started)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrganization {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

/// One entry of the "worklogs updated/deleted since" feeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorklogChange {
    #[serde(rename = "worklogId", deserialize_with = "string_or_number")]
    pub worklog_id: String,
    /// Milliseconds since the Unix epoch
    #[serde(rename = "updatedTime")]
    pub updated_time: i64,
}

impl WorklogChange {
    pub fn updated_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.updated_time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WorklogChangePage {
    #[serde(default)]
    pub values: Vec<WorklogChange>,
    #[serde(rename = "lastPage", default = "default_true")]
    pub last_page: bool,
    #[serde(rename = "nextPage", default)]
    pub next_page: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IssueIdOnly {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IssueSearchPage {
    pub total: u32,
    #[serde(rename = "startAt")]
    pub start_at: u32,
    pub issues: Vec<IssueIdOnly>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProjectSearchPage {
    pub values: Vec<RemoteProject>,
    #[serde(rename = "isLast", default = "default_true")]
    pub is_last: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OrganizationPage {
    pub values: Vec<RemoteOrganization>,
    #[serde(rename = "isLastPage", default = "default_true")]
    pub is_last_page: bool,
}

/// Body of project create/update requests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRequest {
    pub key: String,
    pub name: String,
    #[serde(rename = "projectTypeKey")]
    pub project_type_key: String,
    #[serde(rename = "leadAccountId")]
    pub lead_account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Identity of a record created remotely
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub key: Option<String>,
}

/// Parse a Jira timestamp ("2019-04-08T12:51:36.595+0200")
pub fn parse_jira_datetime(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|e| SyncError::Parse(format!("Invalid Jira timestamp '{}': {}", raw, e)))
}

pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_jira_datetime() {
        let dt = parse_jira_datetime("2019-04-08T12:51:36.595+0200").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7200);
        assert_eq!(dt.with_timezone(&Utc).to_rfc3339(), "2019-04-08T10:51:36.595+00:00");
        assert!(parse_jira_datetime("2019-04-08T10:51:36Z").is_ok());
        assert!(parse_jira_datetime("yesterday").is_err());
    }

    #[test]
    fn test_issue_epic_from_custom_field() {
        let issue: RemoteIssue = serde_json::from_value(json!({
            "id": "10001",
            "key": "TEST-1",
            "fields": {
                "summary": "Write docs",
                "issuetype": {"id": "10002", "name": "Task"},
                "project": {"id": "10000", "key": "TEST"},
                "updated": "2019-04-08T12:51:36.595+0200",
                "customfield_10014": "TEST-9"
            }
        }))
        .unwrap();

        assert_eq!(issue.epic_key("customfield_10014").as_deref(), Some("TEST-9"));
        assert_eq!(issue.parent_key(), None);
        assert!(issue.updated_at().unwrap().is_some());
    }

    #[test]
    fn test_issue_epic_from_next_gen_parent() {
        let issue: RemoteIssue = serde_json::from_value(json!({
            "id": "10003",
            "key": "NG-3",
            "fields": {
                "summary": "Child",
                "issuetype": {"id": "1", "name": "Story"},
                "project": {"id": "2", "key": "NG"},
                "parent": {"id": "10", "key": "NG-1", "fields": {"issuetype": {"id": "5", "name": "Epic"}}}
            }
        }))
        .unwrap();

        assert_eq!(issue.epic_key("customfield_10014").as_deref(), Some("NG-1"));
        assert_eq!(issue.parent_key(), None);
    }

    #[test]
    fn test_numeric_identifiers() {
        let change: WorklogChange =
            serde_json::from_value(json!({"worklogId": 10400, "updatedTime": 1554727896595i64}))
                .unwrap();
        assert_eq!(change.worklog_id, "10400");
        assert_eq!(change.updated_at().timestamp_millis(), 1554727896595);

        let created: CreatedRef =
            serde_json::from_value(json!({"id": 10010, "key": "NEW"})).unwrap();
        assert_eq!(created.id, "10010");
    }
}

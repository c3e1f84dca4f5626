//! Backend (one Jira connection) configuration

use crate::{Result, SyncError};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// How worklog start timestamps are turned into local dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorklogTimezone {
    /// Keep the date in the offset Jira reports for the worklog
    #[default]
    Naive,
    /// Convert to UTC before taking the date
    Utc,
    /// Convert to `worklog_utc_offset` before taking the date
    Fixed,
}

/// Polling intervals of the incremental scans, in seconds (0 disables a scan)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval")]
    pub tasks_secs: u64,

    #[serde(default = "default_scan_interval")]
    pub worklogs_secs: u64,

    #[serde(default = "default_scan_interval")]
    pub deleted_worklogs_secs: u64,

    #[serde(default = "default_catalog_interval")]
    pub issue_types_secs: u64,

    #[serde(default = "default_catalog_interval")]
    pub users_secs: u64,

    #[serde(default)]
    pub organizations_secs: u64,
}

fn default_scan_interval() -> u64 {
    300
}

fn default_catalog_interval() -> u64 {
    86_400
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tasks_secs: default_scan_interval(),
            worklogs_secs: default_scan_interval(),
            deleted_worklogs_secs: default_scan_interval(),
            issue_types_secs: default_catalog_interval(),
            users_secs: default_catalog_interval(),
            organizations_secs: 0,
        }
    }
}

/// One configured Jira connection
///
/// Backends are long-lived: bindings, watermarks and jobs all reference the
/// backend `id`, so renaming a backend orphans its synchronization state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier referenced by bindings and jobs
    pub id: String,

    /// Jira base URL (e.g. https://acme.atlassian.net)
    pub uri: String,

    /// Account email; when set the token is sent with basic auth
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,

    /// Environment variable holding the API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Custom field carrying the epic link of an issue
    #[serde(default = "default_epic_link_field")]
    pub epic_link_field: String,

    /// Custom field carrying the name of an epic
    #[serde(default = "default_epic_name_field")]
    pub epic_name_field: String,

    #[serde(default)]
    pub worklog_timezone: WorklogTimezone,

    /// Offset used by `WorklogTimezone::Fixed` (e.g. "+02:00")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worklog_utc_offset: Option<String>,

    /// Local project receiving worklogs that match no synchronized project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worklog_fallback_project_id: Option<i64>,

    /// Offset Jira uses to interpret JQL date literals for the API user
    #[serde(default = "default_query_offset")]
    pub query_utc_offset: String,

    #[serde(default)]
    pub scan: ScanConfig,
}

fn default_epic_link_field() -> String {
    "customfield_10014".to_string()
}

fn default_epic_name_field() -> String {
    "customfield_10011".to_string()
}

fn default_query_offset() -> String {
    "+00:00".to_string()
}

impl BackendConfig {
    /// Create a backend with default settings
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            user_email: None,
            token_env: None,
            epic_link_field: default_epic_link_field(),
            epic_name_field: default_epic_name_field(),
            worklog_timezone: WorklogTimezone::default(),
            worklog_utc_offset: None,
            worklog_fallback_project_id: None,
            query_utc_offset: default_query_offset(),
            scan: ScanConfig::default(),
        }
    }

    pub fn with_token_env(mut self, var: impl Into<String>) -> Self {
        self.token_env = Some(var.into());
        self
    }

    pub fn with_fallback_project(mut self, project_id: i64) -> Self {
        self.worklog_fallback_project_id = Some(project_id);
        self
    }

    pub fn with_worklog_timezone(mut self, tz: WorklogTimezone, offset: Option<&str>) -> Self {
        self.worklog_timezone = tz;
        self.worklog_utc_offset = offset.map(str::to_string);
        self
    }

    /// Read the API token from the configured environment variable
    pub fn token(&self) -> Option<String> {
        self.token_env
            .as_ref()
            .and_then(|var| std::env::var(var.trim_start_matches('$')).ok())
    }

    /// Offset applied to JQL date literals
    pub fn query_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.query_utc_offset)
    }

    /// Offset used for `WorklogTimezone::Fixed`
    pub fn worklog_offset(&self) -> Result<Option<FixedOffset>> {
        self.worklog_utc_offset
            .as_deref()
            .map(parse_utc_offset)
            .transpose()
    }
}

/// Parse "+02:00", "-0530" or "Z" into a fixed offset
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    let invalid = || SyncError::Config(format!("Invalid UTC offset: '{}'", raw));

    if raw.eq_ignore_ascii_case("z") || raw.is_empty() {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match raw.as_bytes()[0] {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

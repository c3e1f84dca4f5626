//! Remote integrations
//!
//! Everything that talks to Jira lives here. The sync engine only sees the
//! [`RemoteAdapter`] trait; [`JiraAdapter`] is the production implementation.
//!
//! # Layout
//!
//! - **adapter**: the `RemoteAdapter` trait (the seam tests fake)
//! - **jira**: REST client with per-operation timeouts
//! - **retry**: exponential backoff around every request
//! - **types**: wire payloads as Jira returns them

pub mod adapter;
pub mod jira;
pub mod retry;
pub mod types;

pub use adapter::{RemoteAdapter, WORKLOG_PAGE_LIMIT};
pub use jira::JiraAdapter;
pub use retry::{with_retry, RetryConfig, RetryDecision, RetryableError};
pub use types::{
    ms_to_datetime, parse_jira_datetime, CreatedRef, IssueFields, IssueParent, IssueStatus,
    ProjectRef, ProjectRequest, RemoteIssue, RemoteIssueType, RemoteOrganization, RemoteProject,
    RemoteUser, RemoteWorklog, WorklogChange,
};

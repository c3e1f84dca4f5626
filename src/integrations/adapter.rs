//! The remote capability consumed by the synchronization core
//!
//! One method family per entity type. Implementations translate an HTTP 404
//! into [`SyncError::NotFoundInBackend`](crate::SyncError::NotFoundInBackend)
//! and hide pagination: every listing returns one logical sequence.

use super::types::{
    CreatedRef, ProjectRequest, RemoteIssue, RemoteIssueType, RemoteOrganization, RemoteProject,
    RemoteUser, RemoteWorklog, WorklogChange,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value;

/// Remote page-size limit of the bulk worklog endpoint
pub const WORKLOG_PAGE_LIMIT: usize = 1000;

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn read_project(&self, id: &str) -> Result<RemoteProject>;
    async fn search_projects(&self) -> Result<Vec<RemoteProject>>;
    async fn create_project(&self, request: &ProjectRequest) -> Result<CreatedRef>;
    async fn update_project(&self, id: &str, request: &ProjectRequest) -> Result<()>;

    async fn read_issue_type(&self, id: &str) -> Result<RemoteIssueType>;
    async fn list_issue_types(&self) -> Result<Vec<RemoteIssueType>>;

    async fn read_user(&self, account_id: &str) -> Result<RemoteUser>;
    async fn search_users(&self) -> Result<Vec<RemoteUser>>;

    async fn read_issue(&self, id_or_key: &str) -> Result<RemoteIssue>;
    /// Ids of every issue matching the JQL query
    async fn search_issues(&self, jql: &str) -> Result<Vec<String>>;
    async fn create_issue(&self, fields: &Value) -> Result<CreatedRef>;
    async fn update_issue(&self, id: &str, fields: &Value) -> Result<()>;

    async fn read_worklog(&self, id: &str) -> Result<RemoteWorklog>;
    async fn updated_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>>;
    async fn deleted_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>>;
    /// Worklogs for the given ids, fetched lazily in chunks of at most
    /// [`WORKLOG_PAGE_LIMIT`] ids per request
    fn worklogs_by_ids<'a>(&'a self, ids: Vec<String>) -> BoxStream<'a, Result<RemoteWorklog>>;

    async fn read_organization(&self, id: &str) -> Result<RemoteOrganization>;
    async fn list_organizations(&self) -> Result<Vec<RemoteOrganization>>;
}

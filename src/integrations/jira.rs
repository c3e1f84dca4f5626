//! Jira REST adapter
//!
//! Concrete [`RemoteAdapter`] over the Jira REST API v2 (plus the Service
//! Desk API for organizations). Requests are retried by [`with_retry`];
//! 404 answers become `NotFoundInBackend`.

use super::adapter::{RemoteAdapter, WORKLOG_PAGE_LIMIT};
use super::retry::{with_retry, RetryConfig};
use super::types::{
    CreatedRef, IssueSearchPage, OrganizationPage, ProjectRequest, ProjectSearchPage,
    RemoteIssue, RemoteIssueType, RemoteOrganization, RemoteProject, RemoteUser, RemoteWorklog,
    WorklogChange, WorklogChangePage,
};
use crate::config::BackendConfig;
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Client-wide timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for search/query operations (large result sets)
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-request timeout for single record fetches
const GET_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for create/update operations
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

const SEARCH_PAGE_SIZE: u32 = 100;
const PROJECT_PAGE_SIZE: u32 = 50;
const USER_PAGE_SIZE: u32 = 100;
const ORGANIZATION_PAGE_SIZE: u32 = 50;

/// Jira API client for one backend
pub struct JiraAdapter {
    client: Client,
    base_url: String,
    servicedesk_url: String,
    user_email: Option<String>,
    auth_token: Option<String>,
    retry: RetryConfig,
}

impl JiraAdapter {
    /// Create an adapter for a configured backend
    ///
    /// The API token is read from the backend's `token_env` variable.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder().timeout(CLIENT_TIMEOUT).build()?;
        let root = config.uri.trim_end_matches('/');

        Ok(Self {
            client,
            base_url: format!("{}/rest/api/2", root),
            servicedesk_url: format!("{}/rest/servicedeskapi", root),
            user_email: config.user_email.clone(),
            auth_token: config.token(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match (&self.user_email, &self.auth_token) {
            (Some(email), Some(token)) => request.basic_auth(email, Some(token)),
            (None, Some(token)) => request.bearer_auth(token),
            _ => request,
        }
    }

    /// Send one request, mapping HTTP statuses onto the error taxonomy
    async fn send_once(&self, request: RequestBuilder, resource: &str, id: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(SyncError::not_found(resource, id)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Integration(
                "Jira authentication failed".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(SyncError::RateLimited(retry_after))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SyncError::Integration(format!(
                    "Jira API error: HTTP {}: {}",
                    status, body
                )))
            }
        }
    }

    /// Send a request built by `build`, retrying transient failures
    async fn call<F>(&self, operation: &str, resource: &str, id: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        with_retry(&self.retry, operation, || {
            self.send_once(build(&self.client), resource, id)
        })
        .await
    }

    async fn fetch_worklog_chunk(&self, ids: &[String]) -> Result<Vec<RemoteWorklog>> {
        let url = format!("{}/worklog/list", self.base_url);
        let numeric: Vec<Value> = ids
            .iter()
            .map(|id| id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(id)))
            .collect();
        let body = json!({ "ids": numeric });

        debug!(count = ids.len(), "Fetching Jira worklogs in bulk");

        let response = self
            .call("worklog.list", "worklogs", &ids.join(","), |c| {
                c.post(&url).json(&body).timeout(SEARCH_TIMEOUT)
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Follow `nextPage` links of the worklog change feeds
    async fn worklog_feed(&self, feed: &str, since: DateTime<Utc>) -> Result<Vec<WorklogChange>> {
        let mut url = format!(
            "{}/worklog/{}?since={}",
            self.base_url,
            feed,
            since.timestamp_millis()
        );
        let mut changes = Vec::new();

        loop {
            let page_url = url.clone();
            let response = self
                .call(&format!("worklog.{}", feed), "worklog feed", feed, |c| {
                    c.get(&page_url).timeout(SEARCH_TIMEOUT)
                })
                .await?;
            let page: WorklogChangePage = response.json().await?;
            changes.extend(page.values);

            match (page.last_page, page.next_page) {
                (false, Some(next)) => url = next,
                _ => break,
            }
        }

        info!(feed = %feed, since = %since, count = changes.len(), "Jira worklog feed read");
        Ok(changes)
    }
}

#[async_trait]
impl RemoteAdapter for JiraAdapter {
    async fn read_project(&self, id: &str) -> Result<RemoteProject> {
        let url = format!("{}/project/{}", self.base_url, urlencoding::encode(id));
        debug!(project = %id, "Fetching Jira project");

        let response = self
            .call("project.read", "project", id, |c| {
                c.get(&url)
                    .query(&[("expand", "description,lead,issueTypes")])
                    .timeout(GET_TIMEOUT)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn search_projects(&self) -> Result<Vec<RemoteProject>> {
        let url = format!("{}/project/search", self.base_url);
        let mut projects = Vec::new();
        let mut start_at = 0u32;

        loop {
            let params = [
                ("startAt", start_at.to_string()),
                ("maxResults", PROJECT_PAGE_SIZE.to_string()),
                ("expand", "description,lead".to_string()),
            ];
            let response = self
                .call("project.search", "projects", "*", |c| {
                    c.get(&url).query(&params).timeout(SEARCH_TIMEOUT)
                })
                .await?;
            let page: ProjectSearchPage = response.json().await?;
            let fetched = page.values.len() as u32;
            projects.extend(page.values);

            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }

        Ok(projects)
    }

    async fn create_project(&self, request: &ProjectRequest) -> Result<CreatedRef> {
        let url = format!("{}/project", self.base_url);
        info!(key = %request.key, "Creating Jira project");

        let response = self
            .call("project.create", "project", &request.key, |c| {
                c.post(&url).json(request).timeout(WRITE_TIMEOUT)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn update_project(&self, id: &str, request: &ProjectRequest) -> Result<()> {
        let url = format!("{}/project/{}", self.base_url, urlencoding::encode(id));
        info!(project = %id, "Updating Jira project");

        self.call("project.update", "project", id, |c| {
            c.put(&url).json(request).timeout(WRITE_TIMEOUT)
        })
        .await?;
        Ok(())
    }

    async fn read_issue_type(&self, id: &str) -> Result<RemoteIssueType> {
        let url = format!("{}/issuetype/{}", self.base_url, urlencoding::encode(id));
        let response = self
            .call("issuetype.read", "issue type", id, |c| c.get(&url).timeout(GET_TIMEOUT))
            .await?;
        Ok(response.json().await?)
    }

    async fn list_issue_types(&self) -> Result<Vec<RemoteIssueType>> {
        let url = format!("{}/issuetype", self.base_url);
        let response = self
            .call("issuetype.list", "issue types", "*", |c| c.get(&url).timeout(GET_TIMEOUT))
            .await?;
        Ok(response.json().await?)
    }

    async fn read_user(&self, account_id: &str) -> Result<RemoteUser> {
        let url = format!("{}/user", self.base_url);
        let response = self
            .call("user.read", "user", account_id, |c| {
                c.get(&url)
                    .query(&[("accountId", account_id)])
                    .timeout(GET_TIMEOUT)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn search_users(&self) -> Result<Vec<RemoteUser>> {
        let url = format!("{}/users/search", self.base_url);
        let mut users = Vec::new();
        let mut start_at = 0u32;

        loop {
            let params = [
                ("startAt", start_at.to_string()),
                ("maxResults", USER_PAGE_SIZE.to_string()),
            ];
            let response = self
                .call("user.search", "users", "*", |c| {
                    c.get(&url).query(&params).timeout(SEARCH_TIMEOUT)
                })
                .await?;
            let page: Vec<RemoteUser> = response.json().await?;
            let fetched = page.len() as u32;
            users.extend(page);

            if fetched < USER_PAGE_SIZE {
                break;
            }
            start_at += fetched;
        }

        Ok(users)
    }

    async fn read_issue(&self, id_or_key: &str) -> Result<RemoteIssue> {
        let url = format!("{}/issue/{}", self.base_url, urlencoding::encode(id_or_key));
        debug!(issue = %id_or_key, "Fetching Jira issue");

        let response = self
            .call("issue.read", "issue", id_or_key, |c| c.get(&url).timeout(GET_TIMEOUT))
            .await?;
        Ok(response.json().await?)
    }

    async fn search_issues(&self, jql: &str) -> Result<Vec<String>> {
        let url = format!("{}/search", self.base_url);
        let mut ids = Vec::new();
        let mut start_at = 0u32;

        debug!(jql = %jql, "Searching Jira issues");

        loop {
            let params = [
                ("jql", jql.to_string()),
                ("fields", "id".to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", SEARCH_PAGE_SIZE.to_string()),
            ];
            let response = self
                .call("issue.search", "issues", jql, |c| {
                    c.get(&url).query(&params).timeout(SEARCH_TIMEOUT)
                })
                .await?;
            let page: IssueSearchPage = response.json().await?;
            let fetched = page.issues.len() as u32;
            ids.extend(page.issues.into_iter().map(|i| i.id));

            if fetched == 0 || page.start_at + fetched >= page.total {
                break;
            }
            start_at = page.start_at + fetched;
        }

        info!(count = ids.len(), "Jira search complete");
        Ok(ids)
    }

    async fn create_issue(&self, fields: &Value) -> Result<CreatedRef> {
        let url = format!("{}/issue", self.base_url);
        let body = json!({ "fields": fields });

        let response = self
            .call("issue.create", "issue", "new", |c| {
                c.post(&url).json(&body).timeout(WRITE_TIMEOUT)
            })
            .await?;
        let created: CreatedRef = response.json().await?;
        info!(issue = %created.id, key = ?created.key, "Created Jira issue");
        Ok(created)
    }

    async fn update_issue(&self, id: &str, fields: &Value) -> Result<()> {
        let url = format!("{}/issue/{}", self.base_url, urlencoding::encode(id));
        let body = json!({ "fields": fields });

        info!(issue = %id, "Updating Jira issue");
        self.call("issue.update", "issue", id, |c| {
            c.put(&url).json(&body).timeout(WRITE_TIMEOUT)
        })
        .await?;
        Ok(())
    }

    async fn read_worklog(&self, id: &str) -> Result<RemoteWorklog> {
        self.fetch_worklog_chunk(&[id.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::not_found("worklog", id))
    }

    async fn updated_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>> {
        self.worklog_feed("updated", since).await
    }

    async fn deleted_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>> {
        self.worklog_feed("deleted", since).await
    }

    fn worklogs_by_ids<'a>(&'a self, ids: Vec<String>) -> BoxStream<'a, Result<RemoteWorklog>> {
        let chunks: Vec<Vec<String>> = ids
            .chunks(WORKLOG_PAGE_LIMIT)
            .map(<[String]>::to_vec)
            .collect();

        stream::iter(chunks)
            .then(move |chunk| async move { self.fetch_worklog_chunk(&chunk).await })
            .flat_map(|page| {
                let items: Vec<Result<RemoteWorklog>> = match page {
                    Ok(worklogs) => worklogs.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    async fn read_organization(&self, id: &str) -> Result<RemoteOrganization> {
        let url = format!("{}/organization/{}", self.servicedesk_url, urlencoding::encode(id));
        let response = self
            .call("organization.read", "organization", id, |c| {
                c.get(&url).timeout(GET_TIMEOUT)
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn list_organizations(&self) -> Result<Vec<RemoteOrganization>> {
        let url = format!("{}/organization", self.servicedesk_url);
        let mut organizations = Vec::new();
        let mut start = 0u32;

        loop {
            let params = [
                ("start", start.to_string()),
                ("limit", ORGANIZATION_PAGE_SIZE.to_string()),
            ];
            let response = self
                .call("organization.list", "organizations", "*", |c| {
                    c.get(&url).query(&params).timeout(SEARCH_TIMEOUT)
                })
                .await?;
            let page: OrganizationPage = response.json().await?;
            let fetched = page.values.len() as u32;
            organizations.extend(page.values);

            if page.is_last_page || fetched == 0 {
                break;
            }
            start += fetched;
        }

        Ok(organizations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_backend() -> BackendConfig {
        BackendConfig::new("acme", "https://acme.atlassian.net/")
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = JiraAdapter::new(&test_backend()).expect("Failed to create adapter");
        assert_eq!(adapter.base_url, "https://acme.atlassian.net/rest/api/2");
        assert_eq!(
            adapter.servicedesk_url,
            "https://acme.atlassian.net/rest/servicedeskapi"
        );
        assert!(!adapter.is_authenticated());
        assert!(adapter.with_token("secret").is_authenticated());
    }

    #[test]
    fn test_token_from_environment() {
        std::env::set_var("JIRASYNC_TEST_TOKEN", "abc");
        let backend = test_backend().with_token_env("$JIRASYNC_TEST_TOKEN");
        let adapter = JiraAdapter::new(&backend).unwrap();
        assert!(adapter.is_authenticated());
    }

    #[test]
    fn test_page_payloads() {
        let page: WorklogChangePage = serde_json::from_value(json!({
            "values": [{"worklogId": 1, "updatedTime": 10}, {"worklogId": 2, "updatedTime": 20}],
            "since": 0,
            "until": 20,
            "lastPage": false,
            "nextPage": "https://acme.atlassian.net/rest/api/2/worklog/updated?since=20"
        }))
        .unwrap();
        assert_eq!(page.values.len(), 2);
        assert!(!page.last_page);
        assert!(page.next_page.unwrap().ends_with("since=20"));

        let search: IssueSearchPage = serde_json::from_value(json!({
            "total": 3, "startAt": 0, "maxResults": 100,
            "issues": [{"id": "1", "key": "A-1"}, {"id": "2", "key": "A-2"}]
        }))
        .unwrap();
        assert_eq!(search.total, 3);
        assert_eq!(search.issues[1].id, "2");
    }
}

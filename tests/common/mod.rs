//! Shared fixtures: an in-memory Jira and a connector over a temporary store

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use jirasync::config::BackendConfig;
use jirasync::connector::{Connector, ProjectLink};
use jirasync::integrations::{
    CreatedRef, ProjectRequest, RemoteAdapter, RemoteIssue, RemoteIssueType, RemoteOrganization,
    RemoteProject, RemoteUser, RemoteWorklog, WorklogChange,
};
use jirasync::jobs::{JobReport, Worker};
use jirasync::storage::{Session, Store};
use jirasync::sync::{FixedClock, Registry, SyncAction};
use jirasync::{Result, SyncError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const BACKEND: &str = "acme";
pub const JIRA_PROJECT: &str = "10000";
pub const TASK_TYPE: &str = "10001";
pub const SUBTASK_TYPE: &str = "10002";
pub const EPIC_TYPE: &str = "10003";
pub const BUG_TYPE: &str = "10004";

/// Jira as an in-memory adapter
#[derive(Default)]
pub struct FakeJira {
    pub projects: Mutex<HashMap<String, RemoteProject>>,
    pub issue_types: Mutex<HashMap<String, RemoteIssueType>>,
    pub users: Mutex<HashMap<String, RemoteUser>>,
    pub issues: Mutex<HashMap<String, RemoteIssue>>,
    pub worklogs: Mutex<HashMap<String, RemoteWorklog>>,
    pub updated_feed: Mutex<Vec<WorklogChange>>,
    pub deleted_feed: Mutex<Vec<WorklogChange>>,
    pub organizations: Mutex<HashMap<String, RemoteOrganization>>,
    /// Ids returned by every issue search
    pub search_results: Mutex<Vec<String>>,
    /// JQL of every issue search
    pub searches: Mutex<Vec<String>>,
    pub created_issues: Mutex<Vec<Value>>,
    pub updated_issues: Mutex<Vec<(String, Value)>>,
    pub created_projects: Mutex<Vec<ProjectRequest>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: AtomicU64,
    /// Runs once when the given issue is read
    read_issue_hook: Mutex<Option<(String, ReadHook)>>,
}

type ReadHook = Box<dyn FnOnce() + Send>;

impl FakeJira {
    pub fn new() -> Self {
        let jira = Self {
            next_id: AtomicU64::new(30000),
            ..Default::default()
        };
        for (id, name, subtask) in [
            (TASK_TYPE, "Task", false),
            (SUBTASK_TYPE, "Sub-task", true),
            (EPIC_TYPE, "Epic", false),
            (BUG_TYPE, "Bug", false),
        ] {
            jira.issue_types.lock().unwrap().insert(
                id.to_string(),
                RemoteIssueType {
                    id: id.to_string(),
                    name: name.to_string(),
                    description: None,
                    subtask,
                },
            );
        }
        jira.add_project(JIRA_PROJECT, "APO", "Apollo");
        jira.add_user("u-alice", "Alice", Some("alice@example.com"));
        jira.add_user("u-bob", "Bob", Some("bob@example.com"));
        jira.add_user("u-hidden", "Hidden", None);
        jira
    }

    fn called(&self, method: &'static str) {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn add_project(&self, id: &str, key: &str, name: &str) {
        let project = serde_json::from_value(json!({"id": id, "key": key, "name": name}))
            .expect("valid project");
        self.projects.lock().unwrap().insert(id.to_string(), project);
    }

    pub fn add_user(&self, account_id: &str, name: &str, email: Option<&str>) {
        self.users.lock().unwrap().insert(
            account_id.to_string(),
            RemoteUser {
                account_id: account_id.to_string(),
                display_name: name.to_string(),
                email: email.map(str::to_string),
                active: true,
            },
        );
    }

    pub fn add_issue(&self, issue: RemoteIssue) {
        self.issues.lock().unwrap().insert(issue.id.clone(), issue);
    }

    pub fn remove_issue(&self, id: &str) {
        self.issues.lock().unwrap().remove(id);
    }

    pub fn set_issue_updated(&self, id: &str, updated: &str) {
        if let Some(issue) = self.issues.lock().unwrap().get_mut(id) {
            issue.fields.updated = Some(updated.to_string());
        }
    }

    pub fn add_worklog(&self, worklog: RemoteWorklog) {
        self.worklogs
            .lock()
            .unwrap()
            .insert(worklog.id.clone(), worklog);
    }

    pub fn remove_worklog(&self, id: &str) {
        self.worklogs.lock().unwrap().remove(id);
    }

    pub fn feed_update(&self, worklog_id: &str, at: DateTime<Utc>) {
        self.updated_feed.lock().unwrap().push(WorklogChange {
            worklog_id: worklog_id.to_string(),
            updated_time: at.timestamp_millis(),
        });
    }

    pub fn feed_delete(&self, worklog_id: &str, at: DateTime<Utc>) {
        self.deleted_feed.lock().unwrap().push(WorklogChange {
            worklog_id: worklog_id.to_string(),
            updated_time: at.timestamp_millis(),
        });
    }

    /// Run `hook` the first time `id_or_key` is read, before answering
    pub fn on_read_issue(&self, id_or_key: &str, hook: impl FnOnce() + Send + 'static) {
        *self.read_issue_hook.lock().unwrap() = Some((id_or_key.to_string(), Box::new(hook)));
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl RemoteAdapter for FakeJira {
    async fn read_project(&self, id: &str) -> Result<RemoteProject> {
        self.called("read_project");
        self.projects
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("project", id))
    }

    async fn search_projects(&self) -> Result<Vec<RemoteProject>> {
        self.called("search_projects");
        Ok(self.projects.lock().unwrap().values().cloned().collect())
    }

    async fn create_project(&self, request: &ProjectRequest) -> Result<CreatedRef> {
        self.called("create_project");
        let id = self.next_id();
        self.add_project(&id, &request.key, &request.name);
        self.created_projects.lock().unwrap().push(request.clone());
        Ok(CreatedRef {
            id,
            key: Some(request.key.clone()),
        })
    }

    async fn update_project(&self, id: &str, request: &ProjectRequest) -> Result<()> {
        self.called("update_project");
        let mut projects = self.projects.lock().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found("project", id))?;
        project.name = request.name.clone();
        project.description = request.description.clone();
        Ok(())
    }

    async fn read_issue_type(&self, id: &str) -> Result<RemoteIssueType> {
        self.called("read_issue_type");
        self.issue_types
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("issue type", id))
    }

    async fn list_issue_types(&self) -> Result<Vec<RemoteIssueType>> {
        self.called("list_issue_types");
        let mut types: Vec<_> = self.issue_types.lock().unwrap().values().cloned().collect();
        types.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(types)
    }

    async fn read_user(&self, account_id: &str) -> Result<RemoteUser> {
        self.called("read_user");
        self.users
            .lock()
            .unwrap()
            .get(account_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("user", account_id))
    }

    async fn search_users(&self) -> Result<Vec<RemoteUser>> {
        self.called("search_users");
        Ok(self.users.lock().unwrap().values().cloned().collect())
    }

    async fn read_issue(&self, id_or_key: &str) -> Result<RemoteIssue> {
        self.called("read_issue");
        let hook = {
            let mut slot = self.read_issue_hook.lock().unwrap();
            match slot.as_ref() {
                Some((id, _)) if id == id_or_key => slot.take(),
                _ => None,
            }
        };
        if let Some((_, hook)) = hook {
            hook();
        }
        self.issues
            .lock()
            .unwrap()
            .values()
            .find(|i| i.id == id_or_key || i.key == id_or_key)
            .cloned()
            .ok_or_else(|| SyncError::not_found("issue", id_or_key))
    }

    async fn search_issues(&self, jql: &str) -> Result<Vec<String>> {
        self.called("search_issues");
        self.searches.lock().unwrap().push(jql.to_string());
        Ok(self.search_results.lock().unwrap().clone())
    }

    async fn create_issue(&self, fields: &Value) -> Result<CreatedRef> {
        self.called("create_issue");
        let id = self.next_id();
        let project_id = fields["project"]["id"].as_str().unwrap_or_default().to_string();
        let project_key = self
            .projects
            .lock()
            .unwrap()
            .get(&project_id)
            .map(|p| p.key.clone())
            .unwrap_or_else(|| "NEW".to_string());
        let key = format!("{}-{}", project_key, id);
        let issue_type = self
            .issue_types
            .lock()
            .unwrap()
            .get(fields["issuetype"]["id"].as_str().unwrap_or_default())
            .cloned()
            .ok_or_else(|| SyncError::Integration("unknown issue type".to_string()))?;

        self.add_issue(issue(
            &id,
            &key,
            &project_id,
            &project_key,
            &issue_type.id,
            &issue_type.name,
            "2019-04-08T12:00:00.000+0000",
        ));
        self.created_issues.lock().unwrap().push(fields.clone());
        Ok(CreatedRef { id, key: Some(key) })
    }

    async fn update_issue(&self, id: &str, fields: &Value) -> Result<()> {
        self.called("update_issue");
        let mut issues = self.issues.lock().unwrap();
        let issue = issues
            .get_mut(id)
            .ok_or_else(|| SyncError::not_found("issue", id))?;
        if let Some(summary) = fields.get("summary").and_then(Value::as_str) {
            issue.fields.summary = summary.to_string();
        }
        self.updated_issues
            .lock()
            .unwrap()
            .push((id.to_string(), fields.clone()));
        Ok(())
    }

    async fn read_worklog(&self, id: &str) -> Result<RemoteWorklog> {
        self.called("read_worklog");
        self.worklogs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("worklog", id))
    }

    async fn updated_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>> {
        self.called("updated_worklogs_since");
        Ok(self
            .updated_feed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.updated_at() >= since)
            .cloned()
            .collect())
    }

    async fn deleted_worklogs_since(&self, since: DateTime<Utc>) -> Result<Vec<WorklogChange>> {
        self.called("deleted_worklogs_since");
        Ok(self
            .deleted_feed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.updated_at() >= since)
            .cloned()
            .collect())
    }

    fn worklogs_by_ids<'a>(&'a self, ids: Vec<String>) -> BoxStream<'a, Result<RemoteWorklog>> {
        self.called("worklogs_by_ids");
        let found: Vec<Result<RemoteWorklog>> = {
            let worklogs = self.worklogs.lock().unwrap();
            ids.iter()
                .filter_map(|id| worklogs.get(id).cloned())
                .map(Ok)
                .collect()
        };
        stream::iter(found).boxed()
    }

    async fn read_organization(&self, id: &str) -> Result<RemoteOrganization> {
        self.called("read_organization");
        self.organizations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("organization", id))
    }

    async fn list_organizations(&self) -> Result<Vec<RemoteOrganization>> {
        self.called("list_organizations");
        Ok(self.organizations.lock().unwrap().values().cloned().collect())
    }
}

/// A Jira issue payload
pub fn issue(
    id: &str,
    key: &str,
    project_id: &str,
    project_key: &str,
    type_id: &str,
    type_name: &str,
    updated: &str,
) -> RemoteIssue {
    serde_json::from_value(json!({
        "id": id,
        "key": key,
        "fields": {
            "summary": format!("Issue {}", key),
            "issuetype": {"id": type_id, "name": type_name},
            "project": {"id": project_id, "key": project_key, "name": project_key},
            "status": {"name": "To Do"},
            "updated": updated,
        }
    }))
    .expect("valid issue")
}

/// A task of the Apollo project
pub fn apollo_task(id: &str, key: &str) -> RemoteIssue {
    issue(
        id,
        key,
        JIRA_PROJECT,
        "APO",
        TASK_TYPE,
        "Task",
        "2019-04-08T10:00:00.000+0000",
    )
}

pub fn worklog(id: &str, issue_id: &str, author: &str, started: &str, updated: &str) -> RemoteWorklog {
    serde_json::from_value(json!({
        "id": id,
        "issueId": issue_id,
        "author": {"accountId": author, "displayName": author},
        "comment": "Pairing",
        "started": started,
        "timeSpentSeconds": 5400,
        "updated": updated,
    }))
    .expect("valid worklog")
}

pub fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

/// Store, fake Jira and connector for one test
pub struct Harness {
    pub dir: TempDir,
    pub jira: Arc<FakeJira>,
    pub clock: Arc<FixedClock>,
    pub connector: Arc<Connector>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(|_| {})
    }

    pub fn with_backend(configure: impl FnOnce(&mut BackendConfig)) -> Self {
        Self::build(configure, None)
    }

    /// Harness whose connector runs with `registry`
    pub fn with_registry(registry: Registry) -> Self {
        Self::build(|_| {}, Some(registry))
    }

    fn build(configure: impl FnOnce(&mut BackendConfig), registry: Option<Registry>) -> Self {
        jirasync::logging::init_test();

        let dir = TempDir::new().expect("temp dir");
        let store = Store::open(dir.path().join("sync.db")).expect("store");
        let jira = Arc::new(FakeJira::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2019, 4, 8, 12, 0, 0).unwrap(),
        ));

        let mut backend = BackendConfig::new(BACKEND, "https://acme.atlassian.net");
        configure(&mut backend);

        let mut builder = Connector::builder()
            .store(store)
            .backend_with_adapter(backend, jira.clone())
            .clock(clock.clone());
        if let Some(registry) = registry {
            builder = builder.registry(registry);
        }
        let connector = builder.build().expect("connector");

        let harness = Self {
            dir,
            jira,
            clock,
            connector: Arc::new(connector),
        };
        harness.exec(
            "INSERT INTO users (id, login, name, email) VALUES (1, 'alice', 'Alice', 'alice@example.com');
             INSERT INTO users (id, login, name, email) VALUES (2, 'carol', 'Carol', 'carol@example.com');
             INSERT INTO projects (id, name, manager_id) VALUES (1, 'Apollo', 1);
             INSERT INTO projects (id, name, manager_id) VALUES (2, 'Gemini', 1);",
        );
        harness
    }

    pub fn session(&self) -> Session {
        self.connector.store().session().expect("session")
    }

    pub fn exec(&self, sql: &str) {
        self.session()
            .with_conn(|conn| {
                conn.execute_batch(sql)?;
                Ok(())
            })
            .expect("sql");
    }

    pub fn count(&self, sql: &str) -> i64 {
        self.session()
            .with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .expect("count")
    }

    pub fn text(&self, sql: &str) -> Option<String> {
        self.session()
            .with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
            .expect("text")
    }

    /// Link local project 1 to the Apollo Jira project
    pub fn link_apollo(&self, issue_types: &[&str]) -> i64 {
        self.connector
            .link_project(
                BACKEND,
                &ProjectLink {
                    project_id: 1,
                    jira_project_id: Some(JIRA_PROJECT.to_string()),
                    jira_key: Some("APO".to_string()),
                    action: SyncAction::Link,
                    issue_types: issue_types.iter().map(|s| s.to_string()).collect(),
                },
            )
            .expect("link project")
    }

    pub async fn drain(&self) -> Vec<JobReport> {
        Worker::new(self.connector.clone(), "test")
            .expect("worker")
            .drain(100)
            .await
            .expect("drain")
    }
}

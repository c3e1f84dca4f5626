use super::{Dependencies, ImportStrategy};
use crate::integrations::RemoteIssue;
use crate::storage::Binding;
use crate::sync::mapper::{map_task, MappedRecord, TaskLinks};
use crate::sync::matcher::TaskProjectMatcher;
use crate::sync::{Model, SyncEnv};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Jira issues → local tasks
///
/// Only issues of linked projects are imported, and only those whose issue
/// type is synchronized on that project.
pub struct TaskImport;

impl TaskImport {
    async fn issue_type(&self, env: &SyncEnv, raw: &RemoteIssue) -> Result<Option<i64>> {
        let issue_type = &raw.fields.issue_type;
        if let Some(binding) = env.binder(Model::IssueType).to_binding(&issue_type.id)? {
            return Ok(Some(binding.id));
        }
        let data = serde_json::to_value(issue_type)?;
        Ok(env
            .import_dependency(Model::IssueType, &issue_type.id, Some(data))
            .await?
            .map(|b| b.id))
    }

    /// Assignees that cannot be matched leave the task unassigned
    async fn assignee(&self, env: &SyncEnv, raw: &RemoteIssue) -> Result<Option<i64>> {
        let Some(assignee) = &raw.fields.assignee else {
            return Ok(None);
        };
        if let Some(user_id) = env.binder(Model::User).to_local(&assignee.account_id)? {
            return Ok(Some(user_id));
        }
        match env
            .import_dependency(Model::User, &assignee.account_id, None)
            .await
        {
            Ok(binding) => Ok(binding.and_then(|b| b.local_id)),
            Err(SyncError::Mapping(reason)) => {
                warn!(
                    backend = %env.backend_id(),
                    issue = %raw.key,
                    reason = %reason,
                    "Assignee not matched, task left unassigned"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn parent(&self, env: &SyncEnv, raw: &RemoteIssue) -> Result<Option<Binding>> {
        let Some(parent) = raw.fields.parent.as_ref().filter(|p| !p.is_epic()) else {
            return Ok(None);
        };
        env.import_dependency(Model::Task, &parent.id, None).await
    }

    async fn epic(&self, env: &SyncEnv, raw: &RemoteIssue) -> Result<Option<Binding>> {
        if raw.is_epic() {
            return Ok(None);
        }
        let Some(epic_key) = raw.epic_key(&env.backend.epic_link_field) else {
            return Ok(None);
        };

        let known = env.session.binding_by_column(
            &Model::Task.bindings(),
            env.backend_id(),
            "jira_key",
            &epic_key,
        )?;
        if let Some(binding) = known {
            return Ok(Some(binding));
        }

        let epic = env.remote.read_issue(&epic_key).await?;
        let data = serde_json::to_value(&epic)?;
        env.import_dependency(Model::Task, &epic.id, Some(data)).await
    }
}

#[async_trait]
impl ImportStrategy for TaskImport {
    type Raw = RemoteIssue;
    type Deps = TaskLinks;

    const MODEL: Model = Model::Task;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteIssue> {
        env.remote.read_issue(external_id).await
    }

    fn remote_updated_at(&self, raw: &RemoteIssue) -> Result<Option<DateTime<Utc>>> {
        raw.updated_at()
    }

    async fn skip_reason(
        &self,
        env: &SyncEnv,
        raw: &RemoteIssue,
        _binding: Option<&Binding>,
    ) -> Result<Option<String>> {
        let matcher = TaskProjectMatcher::new(env);
        let Some(project) = matcher.project_binding(raw)? else {
            return Ok(Some(format!(
                "project {} is not linked",
                raw.fields.project.key
            )));
        };
        if !matcher.issue_type_synchronized(project.id, &raw.fields.issue_type.id)? {
            return Ok(Some(format!(
                "issue type {} is not synchronized on project {}",
                raw.fields.issue_type.name, raw.fields.project.key
            )));
        }
        Ok(None)
    }

    async fn import_dependencies(
        &self,
        env: &SyncEnv,
        raw: &RemoteIssue,
    ) -> Result<Dependencies<TaskLinks>> {
        let Some(project) = TaskProjectMatcher::new(env).project_binding(raw)? else {
            return Ok(Dependencies::Skip(format!(
                "project {} is not linked",
                raw.fields.project.key
            )));
        };
        let project_id = project.local_id.ok_or_else(|| {
            SyncError::Mapping(format!("project binding {} has no local project", project.id))
        })?;

        let issue_type_binding_id = self.issue_type(env, raw).await?;
        let user_id = self.assignee(env, raw).await?;
        let parent = self.parent(env, raw).await?;
        let epic = self.epic(env, raw).await?;

        Ok(Dependencies::Resolved(TaskLinks {
            project_binding_id: project.id,
            project_id,
            issue_type_binding_id,
            parent_binding_id: parent.as_ref().map(|b| b.id),
            parent_task_id: parent.and_then(|b| b.local_id),
            epic_binding_id: epic.as_ref().map(|b| b.id),
            epic_task_id: epic.and_then(|b| b.local_id),
            user_id,
        }))
    }

    fn map(&self, _env: &SyncEnv, raw: &RemoteIssue, deps: &TaskLinks) -> Result<MappedRecord> {
        map_task(raw, deps)
    }
}

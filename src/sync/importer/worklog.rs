use super::{Dependencies, ImportStrategy, MissingPolicy};
use crate::integrations::{RemoteIssue, RemoteWorklog};
use crate::storage::EntityTable;
use crate::sync::mapper::{map_worklog, MappedRecord, WorklogDatePolicy, WorklogLinks};
use crate::sync::matcher::TaskProjectMatcher;
use crate::sync::{Model, SyncEnv};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Jira worklogs → local timesheet lines
///
/// A worklog is attached to the nearest synchronized ancestor of its issue;
/// without one it goes to the issue's project, then to the backend's
/// fallback project.
pub struct WorklogImport;

impl WorklogImport {
    fn date_policy(env: &SyncEnv) -> Result<WorklogDatePolicy> {
        Ok(WorklogDatePolicy {
            timezone: env.backend.worklog_timezone,
            offset: env.backend.worklog_offset()?,
        })
    }

    async fn author(&self, env: &SyncEnv, raw: &RemoteWorklog) -> Result<Option<i64>> {
        let Some(author) = &raw.author else {
            return Ok(None);
        };
        if let Some(user_id) = env.binder(Model::User).to_local(&author.account_id)? {
            return Ok(Some(user_id));
        }
        Ok(env
            .import_dependency(Model::User, &author.account_id, None)
            .await?
            .and_then(|b| b.local_id))
    }

    /// Local (task, project) of the worklog; `None` when nothing matches
    async fn placement(
        &self,
        env: &SyncEnv,
        issue: &RemoteIssue,
    ) -> Result<Option<(Option<i64>, i64)>> {
        let matcher = TaskProjectMatcher::new(env);

        if let Some(task) = matcher.synchronized_ancestor(issue).await? {
            if let Some(task_id) = task.local_id {
                let project_id = env
                    .session
                    .read_record(&EntityTable::TASKS, task_id)?
                    .and_then(|t| t.get_i64("project_id"));
                if let Some(project_id) = project_id {
                    return Ok(Some((Some(task_id), project_id)));
                }
            }
        }

        if let Some(project_id) = matcher.project_binding(issue)?.and_then(|p| p.local_id) {
            return Ok(Some((None, project_id)));
        }

        Ok(env
            .backend
            .worklog_fallback_project_id
            .map(|project_id| (None, project_id)))
    }
}

#[async_trait]
impl ImportStrategy for WorklogImport {
    type Raw = RemoteWorklog;
    type Deps = WorklogLinks;

    const MODEL: Model = Model::Worklog;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteWorklog> {
        env.remote.read_worklog(external_id).await
    }

    fn remote_updated_at(&self, raw: &RemoteWorklog) -> Result<Option<DateTime<Utc>>> {
        raw.updated_at()
    }

    fn missing_policy(&self) -> MissingPolicy {
        MissingPolicy::Delete
    }

    async fn import_dependencies(
        &self,
        env: &SyncEnv,
        raw: &RemoteWorklog,
    ) -> Result<Dependencies<WorklogLinks>> {
        let issue = match env.remote.read_issue(&raw.issue_id).await {
            Ok(issue) => issue,
            Err(e) if e.is_not_found() => {
                return Ok(Dependencies::Skip(format!(
                    "issue {} of worklog {} no longer exists",
                    raw.issue_id, raw.id
                )))
            }
            Err(e) => return Err(e),
        };

        let Some((task_id, project_id)) = self.placement(env, &issue).await? else {
            return Ok(Dependencies::Skip(format!(
                "no local project matches issue {} and no fallback project is configured",
                issue.key
            )));
        };

        let user_id = self.author(env, raw).await?;

        Ok(Dependencies::Resolved(WorklogLinks {
            user_id,
            task_id,
            project_id: Some(project_id),
            issue_key: Some(issue.key.clone()),
            issue_type_id: Some(issue.fields.issue_type.id.clone()),
            epic_key: issue.epic_key(&env.backend.epic_link_field),
        }))
    }

    fn map(&self, env: &SyncEnv, raw: &RemoteWorklog, deps: &WorklogLinks) -> Result<MappedRecord> {
        map_worklog(raw, deps, &Self::date_policy(env)?)
    }
}

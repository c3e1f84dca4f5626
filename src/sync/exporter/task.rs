use super::ExportStrategy;
use crate::integrations::CreatedRef;
use crate::storage::{Binding, FieldValues};
use crate::sync::mapper::{task_to_remote, TaskExportLinks};
use crate::sync::{Model, SyncEnv};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Pushes tasks of exported projects to Jira issues
pub struct TaskExport;

/// Resolved remote references of one task export
pub struct TaskExportDeps {
    links: TaskExportLinks,
    project_binding_id: i64,
    issue_type_binding_id: i64,
    is_epic: bool,
}

impl TaskExport {
    /// Export binding of the task's project, exported first when needed
    async fn project(&self, env: &SyncEnv, local: &FieldValues) -> Result<(i64, String)> {
        let project_id = local
            .get_i64("project_id")
            .ok_or_else(|| SyncError::Mapping("task has no project".into()))?;
        let binder = env.binder(Model::Project);
        let binding = binder.export_binding(project_id)?.ok_or_else(|| {
            SyncError::Mapping(format!("project {} is not exported to Jira", project_id))
        })?;

        if let Some(external_id) = binding.external_id {
            return Ok((binding.id, external_id));
        }
        env.export_dependency(Model::Project, binding.id).await?;
        let external_id = binder.binding_to_remote(binding.id)?.ok_or_else(|| {
            SyncError::Mapping(format!("project {} could not be exported", project_id))
        })?;
        Ok((binding.id, external_id))
    }

    /// Remote id of the parent task, exported first when it has a binding
    /// without one
    async fn parent(&self, env: &SyncEnv, local: &FieldValues) -> Result<Option<String>> {
        let Some(parent_id) = local.get_i64("parent_id") else {
            return Ok(None);
        };
        let binder = env.binder(Model::Task);
        let Some(binding) = env
            .session
            .bindings_by_local(&Model::Task.bindings(), env.backend_id(), parent_id)?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        if binding.external_id.is_some() {
            return Ok(binding.external_id);
        }
        env.export_dependency(Model::Task, binding.id).await?;
        binder.binding_to_remote(binding.id)
    }
}

#[async_trait]
impl ExportStrategy for TaskExport {
    type Deps = TaskExportDeps;
    type Payload = Value;

    const MODEL: Model = Model::Task;

    async fn remote_updated_at(
        &self,
        env: &SyncEnv,
        external_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        env.remote.read_issue(external_id).await?.updated_at()
    }

    async fn export_dependencies(
        &self,
        env: &SyncEnv,
        binding: &Binding,
        local: &FieldValues,
    ) -> Result<TaskExportDeps> {
        let (project_binding_id, project_external_id) = self.project(env, local).await?;

        let issue_type_binding_id = env
            .session
            .binding_fields(&Model::Task.bindings(), binding.id, &["issue_type_binding_id"])?
            .and_then(|f| f.get_i64("issue_type_binding_id"))
            .ok_or_else(|| {
                SyncError::Mapping(format!("task binding {} has no issue type", binding.id))
            })?;
        let issue_type = env
            .session
            .binding_fields(&Model::IssueType.bindings(), issue_type_binding_id, &["external_id", "name"])?
            .ok_or_else(|| {
                SyncError::Mapping(format!("issue type binding {} does not exist", issue_type_binding_id))
            })?;
        let issue_type_external_id = issue_type
            .get_str("external_id")
            .ok_or_else(|| {
                SyncError::Mapping(format!(
                    "issue type binding {} is not linked to Jira",
                    issue_type_binding_id
                ))
            })?
            .to_string();
        let is_epic = issue_type
            .get_str("name")
            .is_some_and(|n| n.eq_ignore_ascii_case("epic"));

        let parent_external_id = self.parent(env, local).await?;

        Ok(TaskExportDeps {
            links: TaskExportLinks {
                project_external_id,
                issue_type_external_id,
                parent_external_id,
            },
            project_binding_id,
            issue_type_binding_id,
            is_epic,
        })
    }

    fn to_remote(
        &self,
        env: &SyncEnv,
        _binding: &Binding,
        local: &FieldValues,
        deps: &TaskExportDeps,
        fields: &[String],
    ) -> Result<Value> {
        let mut remote = task_to_remote(local, &deps.links, fields);
        // Classic projects require an epic name on epics
        if deps.is_epic {
            if let (Value::Object(map), Some(name)) = (&mut remote, local.get("name")) {
                map.insert(env.backend.epic_name_field.clone(), name.clone());
            }
        }
        Ok(remote)
    }

    async fn create(&self, env: &SyncEnv, payload: &Value) -> Result<CreatedRef> {
        env.remote.create_issue(payload).await
    }

    async fn update(&self, env: &SyncEnv, external_id: &str, payload: &Value) -> Result<()> {
        env.remote.update_issue(external_id, payload).await
    }

    fn after_export(
        &self,
        env: &SyncEnv,
        binding: &Binding,
        deps: &TaskExportDeps,
        created: Option<&CreatedRef>,
    ) -> Result<()> {
        let mut values = FieldValues::new();
        values
            .set("project_binding_id", deps.project_binding_id)
            .set("issue_type_binding_id", deps.issue_type_binding_id);
        if let Some(key) = created.and_then(|c| c.key.clone()) {
            values.set("jira_key", key);
        }
        env.session
            .update_binding(&Model::Task.bindings(), binding.id, &values)
    }
}

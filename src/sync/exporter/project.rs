use super::ExportStrategy;
use crate::integrations::{CreatedRef, ProjectRequest};
use crate::storage::{Binding, FieldValues};
use crate::sync::mapper::project_to_remote;
use crate::sync::{Model, SyncEnv};
use crate::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

const DEFAULT_PROJECT_TYPE: &str = "software";

/// Pushes locally owned projects through their export binding
pub struct ProjectExport;

#[async_trait]
impl ExportStrategy for ProjectExport {
    /// Account id of the project lead
    type Deps = String;
    type Payload = ProjectRequest;

    const MODEL: Model = Model::Project;

    /// Jira projects carry no update time
    async fn remote_updated_at(
        &self,
        _env: &SyncEnv,
        _external_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn export_dependencies(
        &self,
        env: &SyncEnv,
        _binding: &Binding,
        local: &FieldValues,
    ) -> Result<String> {
        let manager_id = local
            .get_i64("manager_id")
            .ok_or_else(|| SyncError::Mapping("project has no manager to lead it in Jira".into()))?;
        env.binder(Model::User)
            .to_remote(manager_id, false)?
            .ok_or_else(|| {
                SyncError::Mapping(format!(
                    "project manager (user {}) is not linked to a Jira account",
                    manager_id
                ))
            })
    }

    fn to_remote(
        &self,
        env: &SyncEnv,
        binding: &Binding,
        local: &FieldValues,
        lead: &String,
        _fields: &[String],
    ) -> Result<ProjectRequest> {
        let extra = env
            .session
            .binding_fields(&Model::Project.bindings(), binding.id, &["jira_key", "project_type"])?
            .unwrap_or_default();
        let key = extra
            .get_str("jira_key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                SyncError::Mapping(format!("project binding {} has no Jira key", binding.id))
            })?;
        let project_type = extra.get_str("project_type").unwrap_or(DEFAULT_PROJECT_TYPE);

        project_to_remote(local, key, project_type, lead)
    }

    async fn create(&self, env: &SyncEnv, payload: &ProjectRequest) -> Result<CreatedRef> {
        env.remote.create_project(payload).await
    }

    async fn update(&self, env: &SyncEnv, external_id: &str, payload: &ProjectRequest) -> Result<()> {
        env.remote.update_project(external_id, payload).await
    }
}

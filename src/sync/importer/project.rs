use super::{Dependencies, ImportStrategy};
use crate::integrations::RemoteProject;
use crate::storage::Binding;
use crate::sync::mapper::{map_project, MappedRecord};
use crate::sync::{Model, SyncEnv};
use crate::{Result, SyncError};
use async_trait::async_trait;

/// Refreshes the binding of projects linked with `link_project`
///
/// Projects are owned locally; a Jira project nobody linked is skipped.
pub struct ProjectImport;

#[async_trait]
impl ImportStrategy for ProjectImport {
    type Raw = RemoteProject;
    type Deps = ();

    const MODEL: Model = Model::Project;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteProject> {
        env.remote.read_project(external_id).await
    }

    async fn skip_reason(
        &self,
        _env: &SyncEnv,
        raw: &RemoteProject,
        binding: Option<&Binding>,
    ) -> Result<Option<String>> {
        Ok(binding
            .is_none()
            .then(|| format!("Jira project {} is not linked to a local project", raw.key)))
    }

    async fn import_dependencies(
        &self,
        _env: &SyncEnv,
        _raw: &RemoteProject,
    ) -> Result<Dependencies<()>> {
        Ok(Dependencies::Resolved(()))
    }

    fn map(&self, _env: &SyncEnv, raw: &RemoteProject, _deps: &()) -> Result<MappedRecord> {
        map_project(raw)
    }

    fn create(
        &self,
        _env: &SyncEnv,
        external_id: &str,
        _raw: &RemoteProject,
        _mapped: &MappedRecord,
    ) -> Result<i64> {
        Err(SyncError::Mapping(format!(
            "Jira project {} must be linked before it can be imported",
            external_id
        )))
    }
}

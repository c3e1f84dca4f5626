use super::{Dependencies, ImportStrategy};
use crate::integrations::RemoteOrganization;
use crate::sync::mapper::{map_organization, MappedRecord};
use crate::sync::{Model, SyncEnv};
use crate::Result;
use async_trait::async_trait;

/// Service Desk organizations; standalone bindings
pub struct OrganizationImport;

#[async_trait]
impl ImportStrategy for OrganizationImport {
    type Raw = RemoteOrganization;
    type Deps = ();

    const MODEL: Model = Model::Organization;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteOrganization> {
        env.remote.read_organization(external_id).await
    }

    async fn import_dependencies(
        &self,
        _env: &SyncEnv,
        _raw: &RemoteOrganization,
    ) -> Result<Dependencies<()>> {
        Ok(Dependencies::Resolved(()))
    }

    fn map(&self, _env: &SyncEnv, raw: &RemoteOrganization, _deps: &()) -> Result<MappedRecord> {
        map_organization(raw)
    }
}

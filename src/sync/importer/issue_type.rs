use super::{Dependencies, ImportStrategy};
use crate::integrations::RemoteIssueType;
use crate::sync::mapper::{map_issue_type, MappedRecord};
use crate::sync::{Model, SyncEnv};
use crate::Result;
use async_trait::async_trait;

/// Issue types are standalone bindings
pub struct IssueTypeImport;

#[async_trait]
impl ImportStrategy for IssueTypeImport {
    type Raw = RemoteIssueType;
    type Deps = ();

    const MODEL: Model = Model::IssueType;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteIssueType> {
        env.remote.read_issue_type(external_id).await
    }

    async fn import_dependencies(
        &self,
        _env: &SyncEnv,
        _raw: &RemoteIssueType,
    ) -> Result<Dependencies<()>> {
        Ok(Dependencies::Resolved(()))
    }

    fn map(&self, _env: &SyncEnv, raw: &RemoteIssueType, _deps: &()) -> Result<MappedRecord> {
        map_issue_type(raw)
    }
}

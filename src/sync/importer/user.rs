use super::{Dependencies, ImportStrategy};
use crate::integrations::RemoteUser;
use crate::storage::{Binding, FieldValues};
use crate::sync::mapper::MappedRecord;
use crate::sync::{Model, SyncEnv};
use crate::{Result, SyncError};
use async_trait::async_trait;

/// Links Jira accounts to existing local users
///
/// Local users are never created from Jira: an account whose email matches
/// no local user (by email, then by login) is a mapping error.
pub struct UserImport;

fn match_local_user(env: &SyncEnv, raw: &RemoteUser) -> Result<i64> {
    let email = raw
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            SyncError::Mapping(format!(
                "Jira user {} ({}) has no visible email address",
                raw.display_name, raw.account_id
            ))
        })?;

    if let Some(id) = env.session.find_user_by_email(email)? {
        return Ok(id);
    }
    if let Some(id) = env.session.find_user_by_login(email)? {
        return Ok(id);
    }
    Err(SyncError::Mapping(format!(
        "no local user matches the Jira user {} <{}>",
        raw.display_name, email
    )))
}

#[async_trait]
impl ImportStrategy for UserImport {
    type Raw = RemoteUser;
    type Deps = ();

    const MODEL: Model = Model::User;

    async fn fetch(&self, env: &SyncEnv, external_id: &str) -> Result<RemoteUser> {
        env.remote.read_user(external_id).await
    }

    async fn import_dependencies(&self, _env: &SyncEnv, _raw: &RemoteUser) -> Result<Dependencies<()>> {
        Ok(Dependencies::Resolved(()))
    }

    fn map(&self, _env: &SyncEnv, _raw: &RemoteUser, _deps: &()) -> Result<MappedRecord> {
        Ok(MappedRecord::default())
    }

    fn create(
        &self,
        env: &SyncEnv,
        external_id: &str,
        raw: &RemoteUser,
        _mapped: &MappedRecord,
    ) -> Result<i64> {
        let user_id = match_local_user(env, raw)?;
        if let Some(other) = env.binder(Model::User).to_remote(user_id, false)? {
            return Err(SyncError::Mapping(format!(
                "local user {} is already linked to the Jira account {}",
                user_id, other
            )));
        }
        env.binder(Model::User)
            .create_binding(Some(user_id), Some(external_id), &FieldValues::new())
    }

    /// Local users are owned locally
    fn update(&self, _env: &SyncEnv, _binding: &Binding, _mapped: &MappedRecord) -> Result<usize> {
        Ok(0)
    }
}

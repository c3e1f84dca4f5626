//! Binder: local identity ↔ Jira identity for one model
//!
//! Three flavours share one type:
//!
//! - plain binders (tasks, users, worklogs): one binding per local record
//! - the wrapped binder (projects): a local project may be linked by several
//!   bindings, at most one of which exports; `to_remote(.., wrap = true)`
//!   only considers that one
//! - standalone binders (issue types, organizations): there is no local
//!   record, the binding itself is the local side

use super::Model;
use crate::storage::{Binding, FieldValues, Session};
use crate::{Result, SyncError};
use chrono::{DateTime, Utc};

/// Project binding synchronization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Jira owns the project, local side follows
    Link,
    /// Local side owns the project and pushes it to Jira
    Export,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Link => "link",
            SyncAction::Export => "export",
        }
    }
}

pub struct Binder<'a> {
    session: &'a Session,
    backend_id: &'a str,
    model: Model,
}

impl<'a> Binder<'a> {
    pub fn new(session: &'a Session, backend_id: &'a str, model: Model) -> Self {
        Self {
            session,
            backend_id,
            model,
        }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Binding of a remote record
    pub fn to_binding(&self, external_id: &str) -> Result<Option<Binding>> {
        self.session
            .binding_by_external(&self.model.bindings(), self.backend_id, external_id)
    }

    /// Local record of a remote record
    ///
    /// Standalone binders return the binding id: the binding is the record.
    pub fn to_local(&self, external_id: &str) -> Result<Option<i64>> {
        Ok(self.to_binding(external_id)?.and_then(|binding| {
            if self.model.is_standalone() {
                Some(binding.id)
            } else {
                binding.local_id
            }
        }))
    }

    /// Remote identity of a local record
    ///
    /// With `wrap` only the exporting binding qualifies; it is the one a
    /// local project is pushed through.
    pub fn to_remote(&self, local_id: i64, wrap: bool) -> Result<Option<String>> {
        let binding = if wrap {
            self.export_binding(local_id)?
        } else {
            self.session
                .bindings_by_local(&self.model.bindings(), self.backend_id, local_id)?
                .into_iter()
                .find(Binding::is_linked)
        };
        Ok(binding.and_then(|b| b.external_id))
    }

    /// Remote identity of a binding row
    pub fn binding_to_remote(&self, binding_id: i64) -> Result<Option<String>> {
        Ok(self.binding(binding_id)?.and_then(|b| b.external_id))
    }

    pub fn binding(&self, binding_id: i64) -> Result<Option<Binding>> {
        self.session.binding(&self.model.bindings(), binding_id)
    }

    /// Local record behind a binding
    pub fn unwrap_local(&self, binding_id: i64) -> Result<Option<i64>> {
        Ok(self.binding(binding_id)?.and_then(|b| b.local_id))
    }

    /// The exporting binding of a local project
    pub fn export_binding(&self, local_id: i64) -> Result<Option<Binding>> {
        for binding in
            self.session
                .bindings_by_local(&self.model.bindings(), self.backend_id, local_id)?
        {
            if self.sync_action(binding.id)? == Some(SyncAction::Export) {
                return Ok(Some(binding));
            }
        }
        Ok(None)
    }

    pub fn sync_action(&self, binding_id: i64) -> Result<Option<SyncAction>> {
        if self.model != Model::Project {
            return Ok(None);
        }
        let fields = self
            .session
            .binding_fields(&self.model.bindings(), binding_id, &["sync_action"])?;
        Ok(fields.and_then(|f| match f.get_str("sync_action") {
            Some("export") => Some(SyncAction::Export),
            Some("link") => Some(SyncAction::Link),
            _ => None,
        }))
    }

    /// Record the association and refresh the remote update time
    ///
    /// Idempotent: binding the same pair twice only refreshes the timestamp.
    pub fn bind(
        &self,
        binding_id: i64,
        external_id: &str,
        external_updated_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(existing) = self.to_binding(external_id)? {
            if existing.id != binding_id {
                return Err(SyncError::Storage(format!(
                    "{} {} is already bound to binding {}",
                    self.model, external_id, existing.id
                )));
            }
        }
        self.session.set_binding_sync(
            &self.model.bindings(),
            binding_id,
            external_id,
            external_updated_at,
        )
    }

    /// Create a binding for a local record (or a standalone binding)
    pub fn create_binding(
        &self,
        local_id: Option<i64>,
        external_id: Option<&str>,
        fields: &FieldValues,
    ) -> Result<i64> {
        let mut values = fields.clone();
        if let Some(external_id) = external_id {
            values.set("external_id", external_id);
        }
        self.session
            .insert_binding(&self.model.bindings(), self.backend_id, local_id, &values)
    }

    /// Forget the remote identity, then drop the binding row
    pub fn unlink(&self, binding_id: i64) -> Result<()> {
        let table = self.model.bindings();
        self.session.clear_external_id(&table, binding_id)?;
        self.session.delete_binding(&table, binding_id)?;
        tracing::info!(
            backend = %self.backend_id,
            model = %self.model,
            binding_id,
            "Binding unlinked"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Session) {
        let dir = TempDir::new().unwrap();
        let session = Store::open(dir.path().join("sync.db")).unwrap().session().unwrap();
        session
            .with_conn(|c| {
                c.execute_batch("INSERT INTO projects (id, name) VALUES (1, 'Apollo');")?;
                Ok(())
            })
            .unwrap();
        (dir, session)
    }

    #[test]
    fn test_wrapped_binder_prefers_export_binding() {
        let (_dir, session) = setup();
        let binder = Binder::new(&session, "acme", Model::Project);

        binder
            .create_binding(Some(1), Some("100"), &FieldValues::new().with("sync_action", "link"))
            .unwrap();
        let export = binder
            .create_binding(Some(1), Some("200"), &FieldValues::new().with("sync_action", "export"))
            .unwrap();

        assert_eq!(binder.to_remote(1, false).unwrap().as_deref(), Some("100"));
        assert_eq!(binder.to_remote(1, true).unwrap().as_deref(), Some("200"));
        assert_eq!(binder.export_binding(1).unwrap().unwrap().id, export);
        assert_eq!(binder.to_local("100").unwrap(), Some(1));
    }

    #[test]
    fn test_second_export_binding_is_rejected() {
        let (_dir, session) = setup();
        let binder = Binder::new(&session, "acme", Model::Project);
        let export = FieldValues::new().with("sync_action", "export");

        binder.create_binding(Some(1), Some("200"), &export).unwrap();
        let err = binder.create_binding(Some(1), Some("300"), &export).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_standalone_binder_returns_binding() {
        let (_dir, session) = setup();
        let binder = Binder::new(&session, "acme", Model::IssueType);
        let id = binder
            .create_binding(None, Some("10002"), &FieldValues::new().with("name", "Task"))
            .unwrap();

        assert_eq!(binder.to_local("10002").unwrap(), Some(id));
        assert_eq!(binder.to_remote(id, false).unwrap(), None);
    }

    #[test]
    fn test_bind_is_idempotent_and_unlink_removes() {
        let (_dir, session) = setup();
        let binder = Binder::new(&session, "acme", Model::Project);
        let id = binder.create_binding(Some(1), None, &FieldValues::new()).unwrap();

        binder.bind(id, "100", None).unwrap();
        binder.bind(id, "100", None).unwrap();
        assert_eq!(binder.to_binding("100").unwrap().unwrap().id, id);

        binder.unlink(id).unwrap();
        assert!(binder.to_binding("100").unwrap().is_none());
        assert!(binder.binding(id).unwrap().is_none());
    }
}

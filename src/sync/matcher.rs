//! Task/project matcher
//!
//! Resolves where a remote issue lives locally: the project binding of its
//! Jira project, whether its issue type is synchronized there, and for
//! worklogs the nearest ancestor issue that is synchronized.

use super::{Model, SyncEnv};
use crate::integrations::RemoteIssue;
use crate::storage::Binding;
use crate::Result;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Parent/epic hops climbed before giving up
const MAX_ANCESTOR_DEPTH: usize = 8;

pub struct TaskProjectMatcher<'a> {
    env: &'a SyncEnv,
}

impl<'a> TaskProjectMatcher<'a> {
    pub fn new(env: &'a SyncEnv) -> Self {
        Self { env }
    }

    /// Project binding of the issue's Jira project
    pub fn project_binding(&self, issue: &RemoteIssue) -> Result<Option<Binding>> {
        self.env
            .binder(Model::Project)
            .to_binding(&issue.fields.project.id)
    }

    /// Whether issues of this type are synchronized on the project binding
    ///
    /// An empty issue type list synchronizes every type.
    pub fn issue_type_synchronized(
        &self,
        project_binding_id: i64,
        issue_type_external_id: &str,
    ) -> Result<bool> {
        let configured = self.env.session.project_issue_types(project_binding_id)?;
        if configured.is_empty() {
            return Ok(true);
        }
        let binding = self
            .env
            .binder(Model::IssueType)
            .to_binding(issue_type_external_id)?;
        Ok(binding.is_some_and(|b| configured.contains(&b.id)))
    }

    /// Climb parent and epic links to the nearest issue of the same Jira
    /// project whose type is synchronized there, import it and return its
    /// task binding
    ///
    /// The climb stops at the first hop that leaves the issue's project.
    pub async fn synchronized_ancestor(&self, issue: &RemoteIssue) -> Result<Option<Binding>> {
        let Some(matched) = self.project_binding(issue)? else {
            return Ok(None);
        };
        let epic_link_field = self.env.backend.epic_link_field.as_str();
        let mut seen = HashSet::new();
        let mut current = issue.clone();

        for _ in 0..MAX_ANCESTOR_DEPTH {
            if !seen.insert(current.id.clone()) {
                return Ok(None);
            }

            if matched.external_id.as_deref() != Some(current.fields.project.id.as_str()) {
                debug!(
                    backend = %self.env.backend_id(),
                    issue = %issue.key,
                    ancestor = %current.key,
                    "Ancestor belongs to another project, climb stopped"
                );
                return Ok(None);
            }

            if self.issue_type_synchronized(matched.id, &current.fields.issue_type.id)? {
                let data = serde_json::to_value(&current)?;
                return self
                    .env
                    .import_dependency(Model::Task, &current.id, Some(data))
                    .await;
            }

            let next = current
                .parent_key()
                .map(str::to_string)
                .or_else(|| current.epic_key(epic_link_field));
            let Some(next) = next else {
                return Ok(None);
            };
            debug!(
                backend = %self.env.backend_id(),
                issue = %current.key,
                ancestor = %next,
                "Climbing to ancestor issue"
            );
            current = self.env.remote.read_issue(&next).await?;
        }

        warn!(
            backend = %self.env.backend_id(),
            issue = %issue.key,
            depth = MAX_ANCESTOR_DEPTH,
            "No synchronized ancestor within the climb limit, placing on the project"
        );
        Ok(None)
    }
}

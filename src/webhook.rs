//! Webhook routing
//!
//! Jira posts an event name (`jira:issue_updated`, `worklog_deleted`, ...)
//! and the affected entity. Deletions become delete jobs, everything else an
//! import job that carries the payload when it is a complete record.

use crate::storage::Job;
use crate::sync::Model;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Webhook jobs run before scan jobs
pub const WEBHOOK_JOB_PRIORITY: i32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub backend: String,
    /// Jira event name
    pub event: String,
    /// Remote id of the affected entity
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl WebhookEvent {
    pub fn new(backend: impl Into<String>, event: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            event: event.into(),
            id: id.into(),
            payload: None,
        }
    }

    /// Parse a Jira webhook body
    pub fn from_jira(backend: impl Into<String>, body: &Value) -> Result<Self> {
        let event = body
            .get("webhookEvent")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Parse("webhook body has no webhookEvent".to_string()))?
            .to_string();

        let mut parsed = Self::new(backend, event, String::new());
        let model = parsed.model()?;
        let (field, id_field) = match model {
            Model::Task => ("issue", "id"),
            Model::Worklog => ("worklog", "id"),
            Model::Project => ("project", "id"),
            Model::User => ("user", "accountId"),
            other => {
                return Err(SyncError::Parse(format!(
                    "webhooks do not carry {} records",
                    other
                )))
            }
        };
        let entity = body
            .get(field)
            .ok_or_else(|| SyncError::Parse(format!("webhook body has no {}", field)))?;
        parsed.id = match entity.get(id_field) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(SyncError::Parse(format!(
                    "webhook {} has no {}",
                    field, id_field
                )))
            }
        };
        if matches!(model, Model::Task | Model::Worklog) && !parsed.is_deletion() {
            parsed.payload = Some(entity.clone());
        }
        Ok(parsed)
    }

    pub fn is_deletion(&self) -> bool {
        self.event.ends_with("_deleted")
    }

    /// Model named by the event
    pub fn model(&self) -> Result<Model> {
        let name = self.event.trim_start_matches("jira:");
        let entity = name.split('_').next().unwrap_or(name);
        match entity {
            "issue" => Ok(Model::Task),
            "worklog" => Ok(Model::Worklog),
            "project" => Ok(Model::Project),
            "user" => Ok(Model::User),
            _ => Err(SyncError::Parse(format!(
                "Unsupported webhook event: {}",
                self.event
            ))),
        }
    }

    /// The job that handles this event
    pub fn to_job(&self) -> Result<Job> {
        let model = self.model()?;
        if self.is_deletion() {
            Ok(Job::DeleteRecord {
                backend: self.backend.clone(),
                model,
                external_id: self.id.clone(),
            })
        } else {
            Ok(Job::ImportRecord {
                backend: self.backend.clone(),
                model,
                external_id: self.id.clone(),
                force: false,
                data: self.payload.clone(),
            })
        }
    }
}

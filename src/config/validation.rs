//! Configuration validation
//!
//! Validates jirasync configuration for correctness:
//! - No duplicate backend ids
//! - Valid http(s) URIs
//! - Parsable UTC offsets
//! - Sane worker settings

use super::backend::{parse_utc_offset, BackendConfig, WorklogTimezone};
use super::jirasync_config::JiraSyncConfig;
use crate::SyncError;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub backend: Option<String>,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: None,
            field: field.into(),
            message: message.into(),
        }
    }

    fn for_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref backend) = self.backend {
            write!(f, "[{}] {}: {}", backend, self.field, self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a jirasync configuration
pub fn validate_config(config: &JiraSyncConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.workers == 0 {
        errors.push(ValidationError::new("workers", "At least one worker is required"));
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if !seen.insert(backend.id.as_str()) {
            errors.push(ValidationError::new(
                "backends",
                format!("Duplicate backend id: {}", backend.id),
            ));
        }
        errors.extend(validate_backend(backend));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert the error list into a single configuration error
pub fn validate_config_result(config: &JiraSyncConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        SyncError::Config(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    })
}

fn validate_backend(backend: &BackendConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let id = backend.id.as_str();

    if id.trim().is_empty() {
        errors.push(ValidationError::new("id", "Backend id must not be empty"));
    }

    if !(backend.uri.starts_with("https://") || backend.uri.starts_with("http://")) {
        errors.push(
            ValidationError::new("uri", format!("Not an http(s) URL: '{}'", backend.uri))
                .for_backend(id),
        );
    }

    if let Err(e) = parse_utc_offset(&backend.query_utc_offset) {
        errors.push(ValidationError::new("query_utc_offset", e.to_string()).for_backend(id));
    }

    match (&backend.worklog_timezone, &backend.worklog_utc_offset) {
        (WorklogTimezone::Fixed, None) => errors.push(
            ValidationError::new(
                "worklog_utc_offset",
                "Required when worklog_timezone is 'fixed'",
            )
            .for_backend(id),
        ),
        (_, Some(offset)) => {
            if let Err(e) = parse_utc_offset(offset) {
                errors.push(ValidationError::new("worklog_utc_offset", e.to_string()).for_backend(id));
            }
        }
        _ => {}
    }

    if backend.epic_link_field.trim().is_empty() {
        errors.push(
            ValidationError::new("epic_link_field", "Must name a Jira field").for_backend(id),
        );
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let mut config = JiraSyncConfig::new();
        config.add_backend(BackendConfig::new("acme", "https://acme.atlassian.net"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_duplicate_backends_and_bad_uri() {
        let mut config = JiraSyncConfig::new();
        config.add_backend(BackendConfig::new("acme", "https://acme.atlassian.net"));
        config.add_backend(BackendConfig::new("acme", "ftp://acme"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.message.contains("Duplicate backend id")));
        assert!(errors.iter().any(|e| e.field == "uri"));
    }

    #[test]
    fn test_fixed_timezone_requires_offset() {
        let mut config = JiraSyncConfig::new();
        let mut backend = BackendConfig::new("acme", "https://acme.atlassian.net");
        backend.worklog_timezone = WorklogTimezone::Fixed;
        config.add_backend(backend);

        let err = validate_config_result(&config).unwrap_err();
        assert!(err.to_string().contains("worklog_utc_offset"));
    }

    #[test]
    fn test_zero_workers() {
        let mut config = JiraSyncConfig::new();
        config.workers = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "workers: At least one worker is required");
    }
}

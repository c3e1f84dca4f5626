//! Error types for jirasync
//!
//! One error enum covers every failure mode of the synchronization engine.
//! The variants that matter to the job runner are:
//!
//! - [`SyncError::NotFoundInBackend`]: the remote record does not exist; the
//!   importer turns it into the missing-record policy, never a failure
//! - [`SyncError::Mapping`]: a required cross reference could not be resolved;
//!   permanent, surfaced to the operator
//! - [`SyncError::Retryable`]: contention or a detected race; re-enqueued
//!
//! Everything else is permanent once the adapter's own retry policy gave up.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for jirasync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Default delay before a retryable job runs again
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Comprehensive error type for jirasync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote entity does not exist (HTTP 404)
    #[error("{resource} {id} not found in Jira")]
    NotFoundInBackend { resource: String, id: String },

    /// A required cross reference could not be resolved while mapping
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Transient failure; the job must be retried later
    #[error("Retryable error: {message}")]
    Retryable {
        message: String,
        retry_after: Duration,
        /// Expected contention that must not consume the retry budget
        ignore_retry: bool,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/database errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Integration errors (Jira API answered with an unexpected status)
    #[error("Integration error: {0}")]
    Integration(String),

    /// Parsing errors (remote payloads, timestamps)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited (retry-after in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anyhow errors (for more context)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// What the job runner does with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Re-enqueue without consuming the retry budget
    RetryUncounted(Duration),
    /// Re-enqueue and count the attempt
    RetryCounted(Duration),
    /// Record the failure, no automatic retry
    Fail,
}

impl SyncError {
    /// Build a retryable error for expected contention
    pub fn contention(message: impl Into<String>) -> Self {
        SyncError::Retryable {
            message: message.into(),
            retry_after: DEFAULT_RETRY_DELAY,
            ignore_retry: true,
        }
    }

    /// Build a retryable error that counts against the retry budget
    pub fn retry_later(message: impl Into<String>, retry_after: Duration) -> Self {
        SyncError::Retryable {
            message: message.into(),
            retry_after,
            ignore_retry: false,
        }
    }

    /// Build a not-found signal
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFoundInBackend {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFoundInBackend { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.disposition(), JobDisposition::RetryCounted(_) | JobDisposition::RetryUncounted(_))
    }

    /// True when the error is a UNIQUE/PRIMARY KEY constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            SyncError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        e.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
            }
            _ => false,
        }
    }

    /// True when SQLite refused the statement because another connection writes
    pub fn is_database_busy(&self) -> bool {
        match self {
            SyncError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Classify the error for the job runner
    pub fn disposition(&self) -> JobDisposition {
        match self {
            SyncError::Retryable {
                retry_after,
                ignore_retry: true,
                ..
            } => JobDisposition::RetryUncounted(*retry_after),
            SyncError::Retryable { retry_after, .. } => JobDisposition::RetryCounted(*retry_after),
            SyncError::RateLimited(secs) => {
                JobDisposition::RetryCounted(Duration::from_secs(*secs))
            }
            e if e.is_database_busy() => JobDisposition::RetryUncounted(Duration::from_secs(2)),
            _ => JobDisposition::Fail,
        }
    }
}

impl crate::integrations::retry::RetryableError for SyncError {
    fn retry_decision(&self) -> crate::integrations::retry::RetryDecision {
        use crate::integrations::retry::RetryDecision;

        match self {
            SyncError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    RetryDecision::Retry
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 => RetryDecision::RetryAfter(Duration::from_secs(60)),
                        500..=599 => RetryDecision::Retry,
                        _ => RetryDecision::NoRetry,
                    }
                } else if e.is_decode() || e.is_builder() {
                    RetryDecision::NoRetry
                } else {
                    RetryDecision::Retry
                }
            }
            SyncError::RateLimited(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
            SyncError::Integration(msg) => {
                if msg.contains("HTTP 5") {
                    RetryDecision::Retry
                } else {
                    RetryDecision::NoRetry
                }
            }
            SyncError::NotFoundInBackend { .. }
            | SyncError::Mapping(_)
            | SyncError::Retryable { .. }
            | SyncError::Config(_)
            | SyncError::Storage(_)
            | SyncError::Parse(_)
            | SyncError::Io(_)
            | SyncError::Json(_)
            | SyncError::Yaml(_)
            | SyncError::Database(_)
            | SyncError::Anyhow(_) => RetryDecision::NoRetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::retry::{RetryDecision, RetryableError};

    #[test]
    fn test_contention_is_uncounted() {
        let err = SyncError::contention("lock held");
        assert_eq!(
            err.disposition(),
            JobDisposition::RetryUncounted(DEFAULT_RETRY_DELAY)
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retry_later_is_counted() {
        let err = SyncError::retry_later("flaky", Duration::from_secs(3));
        assert_eq!(
            err.disposition(),
            JobDisposition::RetryCounted(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_mapping_and_not_found_are_permanent() {
        assert_eq!(
            SyncError::Mapping("no user".into()).disposition(),
            JobDisposition::Fail
        );
        let nf = SyncError::not_found("issue", "10001");
        assert!(nf.is_not_found());
        assert_eq!(nf.disposition(), JobDisposition::Fail);
        assert_eq!(nf.retry_decision(), RetryDecision::NoRetry);
        assert_eq!(nf.to_string(), "issue 10001 not found in Jira");
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: SyncError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_unique_violation());
        assert!(!err.is_database_busy());
    }

    #[test]
    fn test_integration_5xx_retries() {
        let err = SyncError::Integration("Jira API error: HTTP 503 Service Unavailable: ".into());
        assert_eq!(err.retry_decision(), RetryDecision::Retry);
        let err = SyncError::Integration("Jira API error: HTTP 400 Bad Request: ".into());
        assert_eq!(err.retry_decision(), RetryDecision::NoRetry);
    }
}

//! Error types for the Sentra authorization engine.
//!
//! Every operation in the engine returns either the produced entity or a
//! `SentraError` whose kind comes from a closed taxonomy, so callers can
//! react programmatically without string matching.

use std::fmt;

use crate::validation::ValidationIssue;

/// Errors that can occur in the policy store, version store, rollback
/// manager, and audit pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SentraError {
    /// A requested policy, derived role, or version does not exist.
    #[error("{entity} not found: {name}")]
    NotFound {
        /// What was looked up ("policy", "derived role", "version", ...).
        entity: String,
        /// The identifier that missed.
        name: String,
    },

    /// An entity with the same name already exists.
    #[error("{entity} already exists: {name}")]
    AlreadyExists {
        /// What was added ("policy", "derived role", ...).
        entity: String,
        /// The duplicated identifier.
        name: String,
    },

    /// One or more structural or expression errors; nothing was applied.
    #[error("validation failed with {} error(s)", issues.len())]
    Validation {
        /// The individual validation failures.
        issues: Vec<ValidationIssue>,
    },

    /// An update or rollback could not complete because a concurrent change
    /// invalidated its precondition.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting condition.
        message: String,
    },

    /// Both a forward step and its compensating rollback failed; the store
    /// may be inconsistent.
    #[error("update failed and rollback failed; update: {update}; rollback: {rollback}")]
    FatalRollback {
        /// The error that aborted the forward step.
        update: Box<SentraError>,
        /// The error that aborted the restore.
        rollback: Box<SentraError>,
    },

    /// Hash-chain verification failed.
    #[error("audit chain corruption: {message}")]
    Corruption {
        /// Where and how the chain broke.
        message: String,
    },

    /// The audit ingest buffer was full and the event was dropped.
    #[error("audit buffer full (capacity {capacity})")]
    BufferFull {
        /// Configured buffer capacity.
        capacity: usize,
    },

    /// The durable store rejected a write.
    #[error("storage fault: {message}")]
    StorageFault {
        /// Description of the storage failure.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled: {message}")]
    Cancelled {
        /// What was cancelled.
        message: String,
    },

    /// The operation did not complete within its deadline.
    #[error("deadline exceeded: {message}")]
    DeadlineExceeded {
        /// What timed out.
        message: String,
    },

    /// The configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl SentraError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            name: name.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(entity: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity: entity.into(),
            name: name.into(),
        }
    }

    /// Creates a new `Validation` error from a list of issues.
    #[must_use]
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation { issues }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `FatalRollback` error carrying both causes.
    #[must_use]
    pub fn fatal_rollback(update: SentraError, rollback: SentraError) -> Self {
        Self::FatalRollback {
            update: Box::new(update),
            rollback: Box::new(rollback),
        }
    }

    /// Creates a new `Corruption` error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates a new `BufferFull` error.
    #[must_use]
    pub fn buffer_full(capacity: usize) -> Self {
        Self::BufferFull { capacity }
    }

    /// Creates a new `StorageFault` error.
    #[must_use]
    pub fn storage_fault(message: impl Into<String>) -> Self {
        Self::StorageFault {
            message: message.into(),
        }
    }

    /// Creates a new `Cancelled` error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Creates a new `DeadlineExceeded` error.
    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the kind of this error for logging and branching.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Conflict { .. } | Self::FatalRollback { .. } => ErrorKind::Conflict,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::BufferFull { .. } => ErrorKind::BufferFull,
            Self::StorageFault { .. } => ErrorKind::StorageFault,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the validation issues if this is a `Validation` error.
    #[must_use]
    pub fn validation_issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            Self::Validation { issues } => Some(issues),
            _ => None,
        }
    }

    /// Returns `true` if the request itself was at fault (caller can fix and
    /// retry with different input).
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::Validation { .. }
        )
    }

    /// Returns `true` if the engine or its collaborators were at fault.
    #[must_use]
    pub fn is_engine_error(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::FatalRollback { .. }
                | Self::Corruption { .. }
                | Self::StorageFault { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the operation may succeed when retried unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BufferFull { .. }
                | Self::StorageFault { .. }
                | Self::Cancelled { .. }
                | Self::DeadlineExceeded { .. }
        )
    }
}

/// The closed set of error kinds in the Sentra taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested entity absent.
    NotFound,
    /// Duplicate add.
    AlreadyExists,
    /// Structural or expression validation failed.
    Validation,
    /// Concurrent change invalidated a precondition.
    Conflict,
    /// Hash-chain verification failed.
    Corruption,
    /// Audit ingest buffer full; event dropped.
    BufferFull,
    /// Durable store rejected a write.
    StorageFault,
    /// Operation cancelled.
    Cancelled,
    /// Operation missed its deadline.
    DeadlineExceeded,
    /// Invalid configuration.
    Configuration,
    /// Unexpected internal fault.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Corruption => "corruption",
            Self::BufferFull => "buffer_full",
            Self::StorageFault => "storage_fault",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{IssueTag, ValidationIssue};

    #[test]
    fn test_error_display() {
        let err = SentraError::not_found("policy", "p1");
        assert_eq!(err.to_string(), "policy not found: p1");

        let err = SentraError::already_exists("derived role", "admin_like");
        assert_eq!(err.to_string(), "derived role already exists: admin_like");

        let err = SentraError::buffer_full(2);
        assert_eq!(err.to_string(), "audit buffer full (capacity 2)");
    }

    #[test]
    fn test_fatal_rollback_carries_both_causes() {
        let err = SentraError::fatal_rollback(
            SentraError::storage_fault("disk gone"),
            SentraError::conflict("version vanished"),
        );
        let text = err.to_string();
        assert!(text.contains("disk gone"));
        assert!(text.contains("version vanished"));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SentraError::not_found("policy", "x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SentraError::validation(vec![]).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            SentraError::corruption("broken at 3").kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            SentraError::deadline_exceeded("batch write").kind(),
            ErrorKind::DeadlineExceeded
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(SentraError::not_found("policy", "x").is_caller_error());
        assert!(!SentraError::not_found("policy", "x").is_retryable());

        assert!(SentraError::buffer_full(10).is_retryable());
        assert!(!SentraError::buffer_full(10).is_engine_error());

        assert!(SentraError::storage_fault("write refused").is_engine_error());
        assert!(SentraError::storage_fault("write refused").is_retryable());
    }

    #[test]
    fn test_validation_issues_accessor() {
        let issues = vec![ValidationIssue::new(IssueTag::Schema, "rules are required")];
        let err = SentraError::validation(issues);
        assert_eq!(err.validation_issues().unwrap().len(), 1);
        assert!(SentraError::conflict("x").validation_issues().is_none());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::BufferFull.to_string(), "buffer_full");
        assert_eq!(
            ErrorKind::DeadlineExceeded.to_string(),
            "deadline_exceeded"
        );
    }
}

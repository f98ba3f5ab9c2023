//! Change-event types.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Kind of policy-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ChangeEventKind {
    /// The policy set was replaced by a successful update.
    #[serde(rename = "policy.updated")]
    PolicyUpdated,

    /// The policy set was restored from a stored version.
    #[serde(rename = "policy.rolled_back")]
    PolicyRolledBack,

    /// An update was rejected by validation; nothing changed.
    #[serde(rename = "policy.validation_failed")]
    PolicyValidationFailed,

    /// A new version snapshot was saved.
    #[serde(rename = "version.created")]
    VersionCreated,
}

impl ChangeEventKind {
    /// Returns the string representation of the event kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyUpdated => "policy.updated",
            Self::PolicyRolledBack => "policy.rolled_back",
            Self::PolicyValidationFailed => "policy.validation_failed",
            Self::VersionCreated => "version.created",
        }
    }
}

impl fmt::Display for ChangeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A policy-change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeEventKind,

    /// The version number involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    /// Names of the policies involved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,

    /// The change comment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// When the event was produced.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// Free-form event payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

impl ChangeEvent {
    /// Creates an event of the given kind with the current timestamp.
    #[must_use]
    pub fn new(kind: ChangeEventKind) -> Self {
        Self {
            kind,
            version: None,
            policies: Vec::new(),
            comment: None,
            timestamp: OffsetDateTime::now_utc(),
            detail: serde_json::Value::Null,
        }
    }

    /// Creates a `policy.updated` event.
    #[must_use]
    pub fn updated(version: u64, policies: Vec<String>, comment: impl Into<String>) -> Self {
        Self {
            version: Some(version),
            policies,
            comment: Some(comment.into()),
            ..Self::new(ChangeEventKind::PolicyUpdated)
        }
    }

    /// Creates a `policy.rolled_back` event.
    #[must_use]
    pub fn rolled_back(target_version: u64, policies: Vec<String>) -> Self {
        Self {
            version: Some(target_version),
            policies,
            ..Self::new(ChangeEventKind::PolicyRolledBack)
        }
    }

    /// Creates a `policy.validation_failed` event.
    #[must_use]
    pub fn validation_failed(policies: Vec<String>, detail: serde_json::Value) -> Self {
        Self {
            policies,
            detail,
            ..Self::new(ChangeEventKind::PolicyValidationFailed)
        }
    }

    /// Creates a `version.created` event.
    #[must_use]
    pub fn version_created(version: u64, comment: impl Into<String>) -> Self {
        Self {
            version: Some(version),
            comment: Some(comment.into()),
            ..Self::new(ChangeEventKind::VersionCreated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(ChangeEventKind::PolicyUpdated.as_str(), "policy.updated");
        assert_eq!(
            ChangeEventKind::PolicyRolledBack.to_string(),
            "policy.rolled_back"
        );
    }

    #[test]
    fn test_kind_serde_rename() {
        let json = serde_json::to_string(&ChangeEventKind::VersionCreated).unwrap();
        assert_eq!(json, "\"version.created\"");
        let back: ChangeEventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChangeEventKind::VersionCreated);
    }

    #[test]
    fn test_event_constructors() {
        let event = ChangeEvent::updated(3, vec!["p1".to_string()], "rollout");
        assert_eq!(event.kind, ChangeEventKind::PolicyUpdated);
        assert_eq!(event.version, Some(3));
        assert_eq!(event.comment.as_deref(), Some("rollout"));

        let event = ChangeEvent::validation_failed(
            vec!["p2".to_string()],
            serde_json::json!({ "errors": 2 }),
        );
        assert_eq!(event.kind, ChangeEventKind::PolicyValidationFailed);
        assert_eq!(event.detail["errors"], 2);
    }
}

//! Validation issue types shared by the validator and its callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum IssueTag {
    /// Malformed identifier or expression text.
    Syntax,
    /// Structurally well-formed but meaningless (duplicates, dangling refs).
    Semantic,
    /// Condition expression failed to compile or evaluate to a boolean.
    Cel,
    /// Circular dependency among derived roles.
    CircularDep,
    /// Missing or malformed required field.
    Schema,
    /// Rules that contradict or shadow each other.
    Conflict,
    /// A warning promoted to an error by strict mode.
    WarningAsError,
}

impl IssueTag {
    /// Returns the string representation of the tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Semantic => "semantic",
            Self::Cel => "cel",
            Self::CircularDep => "circular_dep",
            Self::Schema => "schema",
            Self::Conflict => "conflict",
            Self::WarningAsError => "warning_as_error",
        }
    }
}

impl fmt::Display for IssueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single validation finding with its location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Classification tag.
    pub tag: IssueTag,

    /// Human-readable description identifying the offending element.
    pub message: String,

    /// Name of the policy the issue belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    /// Name of the rule the issue belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl ValidationIssue {
    /// Creates a new issue.
    #[must_use]
    pub fn new(tag: IssueTag, message: impl Into<String>) -> Self {
        Self {
            tag,
            message: message.into(),
            policy: None,
            rule: None,
        }
    }

    /// Attaches the owning policy name.
    #[must_use]
    pub fn for_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Attaches the owning rule name.
    #[must_use]
    pub fn for_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.tag)?;
        if let Some(policy) = &self.policy {
            write!(f, " policy '{policy}'")?;
        }
        if let Some(rule) = &self.rule {
            write!(f, " rule '{rule}'")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of validating one entity or a batch.
///
/// Errors are fatal; warnings are advisory unless strict mode promotes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Fatal findings.
    pub errors: Vec<ValidationIssue>,

    /// Advisory findings.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    /// An outcome with no findings.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Returns `true` if there are no errors.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Records a fatal finding.
    pub fn push_error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    /// Records an advisory finding.
    pub fn push_warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    /// Absorbs another outcome's findings.
    pub fn merge(&mut self, other: ValidationOutcome) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Moves every warning into the error list, retagged as
    /// [`IssueTag::WarningAsError`].
    pub fn promote_warnings(&mut self) {
        for mut warning in self.warnings.drain(..) {
            warning.tag = IssueTag::WarningAsError;
            self.errors.push(warning);
        }
    }

    /// Converts the outcome into a result, surfacing errors as a
    /// [`crate::SentraError::Validation`].
    ///
    /// # Errors
    ///
    /// Returns `Validation` carrying every error when the outcome is invalid.
    pub fn into_result(self) -> crate::SentraResult<()> {
        if self.valid() {
            Ok(())
        } else {
            Err(crate::SentraError::validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_strings() {
        assert_eq!(IssueTag::CircularDep.as_str(), "circular_dep");
        assert_eq!(IssueTag::WarningAsError.to_string(), "warning_as_error");
    }

    #[test]
    fn test_issue_display_includes_location() {
        let issue = ValidationIssue::new(IssueTag::Conflict, "overlapping actions")
            .for_policy("p1")
            .for_rule("r2");
        let text = issue.to_string();
        assert!(text.contains("[conflict]"));
        assert!(text.contains("policy 'p1'"));
        assert!(text.contains("rule 'r2'"));
    }

    #[test]
    fn test_outcome_validity_and_merge() {
        let mut outcome = ValidationOutcome::ok();
        assert!(outcome.valid());

        outcome.push_warning(ValidationIssue::new(IssueTag::Conflict, "shadowed rule"));
        assert!(outcome.valid());

        let mut other = ValidationOutcome::ok();
        other.push_error(ValidationIssue::new(IssueTag::Schema, "missing name"));
        outcome.merge(other);
        assert!(!outcome.valid());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_promote_warnings() {
        let mut outcome = ValidationOutcome::ok();
        outcome.push_warning(ValidationIssue::new(IssueTag::Conflict, "shadowed rule"));
        outcome.promote_warnings();

        assert!(!outcome.valid());
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.errors[0].tag, IssueTag::WarningAsError);
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationOutcome::ok().into_result().is_ok());

        let mut outcome = ValidationOutcome::ok();
        outcome.push_error(ValidationIssue::new(IssueTag::Schema, "missing name"));
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.validation_issues().unwrap().len(), 1);
    }
}

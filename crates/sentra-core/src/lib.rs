//! # sentra-core
//!
//! Shared foundation for the Sentra authorization engine.
//!
//! This crate provides:
//! - The policy data model (policies, rules, derived roles, selectors)
//! - The unified error taxonomy used across all Sentra crates
//! - Validation issue types shared between the validator and its callers
//! - The policy-change event system (types and the bounded notifier)
//! - UTC timestamp helpers with microsecond precision
//!
//! ## Modules
//!
//! - [`policy`] - Policy, rule, and derived-role model with identifier helpers
//! - [`error`] - `SentraError` and the error-kind taxonomy
//! - [`validation`] - Issue tags and validation outcomes
//! - [`events`] - Change-event types and the [`events::ChangeNotifier`]
//! - [`time`] - Microsecond-precision UTC formatting and serde support

pub mod error;
pub mod events;
pub mod policy;
pub mod time;
pub mod validation;

pub use error::{ErrorKind, SentraError};
pub use events::{ChangeEvent, ChangeEventKind, ChangeNotifier};
pub use policy::{
    DerivedRole, Effect, Policy, PrincipalSelector, ResourceSelector, Rule, is_valid_action,
    is_valid_kind, is_valid_name, parent_scope,
};
pub use time::{format_event_timestamp, now_utc, parse_event_timestamp};
pub use validation::{IssueTag, ValidationIssue, ValidationOutcome};

/// Type alias for results across the Sentra crates.
pub type SentraResult<T> = Result<T, SentraError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sentra_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::SentraResult;
    pub use crate::error::{ErrorKind, SentraError};
    pub use crate::events::{ChangeEvent, ChangeEventKind, ChangeNotifier};
    pub use crate::policy::{
        DerivedRole, Effect, Policy, PrincipalSelector, ResourceSelector, Rule,
    };
    pub use crate::validation::{IssueTag, ValidationIssue, ValidationOutcome};
}

//! # sentra-policy
//!
//! Policy management for the Sentra authorization engine.
//!
//! This crate owns the write side of the engine: an index-accelerated
//! in-memory policy store, a structural/expression validator, a bounded
//! version store with checksummed snapshots, and the rollback manager that
//! ties them together into an atomic update path.
//!
//! The authorization hot path reads through the store's lookup API
//! ([`PolicyStore::find_by_kind`] and friends); all bulk mutation goes
//! through the [`RollbackManager`].
//!
//! ## Modules
//!
//! - [`condition`] - Condition compiler seam and the expression cache
//! - [`validator`] - Structural, expression, cross-reference, and cycle checks
//! - [`index`] - Kind/scope/principal/role indexes
//! - [`store`] - The authoritative policy store
//! - [`version`] - Bounded, checksummed snapshot store
//! - [`rollback`] - Atomic update-with-rollback protocol
//! - [`config`] - Validator and version-store configuration

pub mod condition;
pub mod config;
pub mod index;
pub mod rollback;
pub mod store;
pub mod validator;
pub mod version;

pub use condition::{CompiledCondition, ConditionCache, ConditionCompiler, ConditionInput, RhaiCompiler};
pub use config::{ValidatorConfig, VersionConfig};
pub use index::{IndexStats, KindIndex, PolicyIndexes, PrincipalIndex, RoleIndex, ScopeIndex};
pub use rollback::{ManagerStats, RollbackManager};
pub use store::{PolicyStore, StoreStats};
pub use validator::PolicyValidator;
pub use version::{PolicyVersion, VersionStore, VersionStoreStats, compute_checksum};

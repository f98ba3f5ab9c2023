//! Validator and version-store configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the policy validator.
///
/// # Example (TOML)
///
/// ```toml
/// [validator]
/// strict_mode = false
/// check_circular_dep = true
/// allowed_actions = ["read", "write", "delete"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Promote every warning to an error.
    pub strict_mode: bool,

    /// Run the enhanced condition checks (allowed-list vetting and dry
    /// evaluation). Basic compile checks always run.
    pub validate_cel: bool,

    /// Detect cycles in the derived-role dependency graph.
    pub check_circular_dep: bool,

    /// Recursion bound for cycle detection.
    pub max_rule_depth: usize,

    /// When non-empty, only these actions (plus `*`) are accepted.
    pub allowed_actions: Vec<String>,

    /// When non-empty, only these resource kinds (plus `*`) are accepted.
    pub allowed_resources: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            validate_cel: true,
            check_circular_dep: true,
            max_rule_depth: 10,
            allowed_actions: Vec::new(),
            allowed_resources: Vec::new(),
        }
    }
}

/// Configuration for the version store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VersionConfig {
    /// How many policy snapshots to retain; the oldest is discarded first.
    pub max_versions: usize,
}

impl VersionConfig {
    /// The retention bound, clamped to the minimum of one snapshot.
    #[must_use]
    pub fn retention(&self) -> usize {
        self.max_versions.max(1)
    }
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self { max_versions: 10 }
    }
}

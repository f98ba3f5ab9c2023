//! The authoritative in-memory policy store.
//!
//! The store owns the `name -> Policy` and `name -> DerivedRole` maps plus
//! the four lookup indexes. Writes take the exclusive lock and update the
//! maps and every index under the same guard, so readers observe either the
//! pre-update or post-update state, never a partial mix.
//!
//! Bulk mutation is intended to go through
//! [`crate::rollback::RollbackManager`]; the write API here is the primitive
//! layer it drives.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sentra_core::policy::{DerivedRole, Policy};
use sentra_core::validation::{IssueTag, ValidationIssue};
use sentra_core::{SentraError, SentraResult};
use tokio::sync::RwLock;

use crate::condition::ConditionCache;
use crate::index::{IndexStats, PolicyIndexes};

#[derive(Default)]
struct StoreInner {
    policies: HashMap<String, Arc<Policy>>,
    derived_roles: HashMap<String, Arc<DerivedRole>>,
    indexes: PolicyIndexes,
}

/// Counts describing the store's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of policies.
    pub policies: usize,
    /// Number of derived-role definitions.
    pub derived_roles: usize,
    /// Index sizes.
    pub indexes: IndexStats,
}

/// In-memory, index-accelerated policy store.
pub struct PolicyStore {
    inner: RwLock<StoreInner>,
    conditions: Arc<ConditionCache>,
}

impl PolicyStore {
    /// Creates an empty store sharing the given expression cache.
    #[must_use]
    pub fn new(conditions: Arc<ConditionCache>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            conditions,
        }
    }

    /// The expression cache this store primes on insert.
    #[must_use]
    pub fn conditions(&self) -> &Arc<ConditionCache> {
        &self.conditions
    }

    // -------------------------------------------------------------------------
    // Policy reads
    // -------------------------------------------------------------------------

    /// Looks up a policy by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.inner.read().await.policies.get(name).cloned()
    }

    /// Every policy in the store, in unspecified order.
    pub async fn get_all(&self) -> Vec<Arc<Policy>> {
        self.inner.read().await.policies.values().cloned().collect()
    }

    /// Deep-copied snapshot of the policy map, keyed and ordered by name.
    pub async fn snapshot(&self) -> BTreeMap<String, Policy> {
        self.inner
            .read()
            .await
            .policies
            .iter()
            .map(|(name, policy)| (name.clone(), (**policy).clone()))
            .collect()
    }

    /// Number of policies.
    pub async fn count(&self) -> usize {
        self.inner.read().await.policies.len()
    }

    /// Policies governing a resource kind (kind index only).
    pub async fn find_by_kind(&self, kind: &str) -> Vec<Arc<Policy>> {
        self.inner.read().await.indexes.kind.find(kind)
    }

    /// Policies for exactly this `(scope, kind)` pair.
    ///
    /// Hierarchical resolution over the dotted scope is the caller's job;
    /// see [`sentra_core::policy::parent_scope`].
    pub async fn find_by_scope_and_kind(&self, scope: &str, kind: &str) -> Vec<Arc<Policy>> {
        self.inner.read().await.indexes.scope.find(scope, kind)
    }

    /// Principal policies for a principal id and resource kind, exact-kind
    /// entries before `*` entries.
    pub async fn find_by_principal(&self, principal_id: &str, kind: &str) -> Vec<Arc<Policy>> {
        self.inner
            .read()
            .await
            .indexes
            .principal
            .find(principal_id, kind)
    }

    /// Principal policies for any of `roles` and a resource kind.
    pub async fn find_by_roles(&self, roles: &[String], kind: &str) -> Vec<Arc<Policy>> {
        self.inner.read().await.indexes.role.find(roles, kind)
    }

    /// Policies for a kind whose rules cover any of `actions` (an empty
    /// action list matches everything).
    pub async fn find_policies(&self, kind: &str, actions: &[String]) -> Vec<Arc<Policy>> {
        self.find_by_kind(kind)
            .await
            .into_iter()
            .filter(|p| p.matches_any_action(actions))
            .collect()
    }

    /// Scoped variant of [`Self::find_policies`].
    pub async fn find_policies_for_scope(
        &self,
        scope: &str,
        kind: &str,
        actions: &[String],
    ) -> Vec<Arc<Policy>> {
        self.find_by_scope_and_kind(scope, kind)
            .await
            .into_iter()
            .filter(|p| p.matches_any_action(actions))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Policy writes
    // -------------------------------------------------------------------------

    /// Adds a policy, indexing it atomically.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` when a policy with the same name is present.
    /// - `Validation` when a principal policy lacks its principal selector or
    ///   resource selectors. The store is unchanged on error.
    pub async fn add(&self, policy: Policy) -> SentraResult<()> {
        check_principal_shape(&policy)?;

        let mut inner = self.inner.write().await;
        if inner.policies.contains_key(&policy.name) {
            return Err(SentraError::already_exists("policy", &policy.name));
        }

        // Warm the expression cache so the first authorization check does not
        // pay compilation latency. The validator owns rejection; here a bad
        // condition is only logged.
        for condition in policy.conditions() {
            if let Err(e) = self.conditions.prime(condition) {
                tracing::warn!(
                    policy = %policy.name,
                    error = %e,
                    "Condition failed to compile while priming cache"
                );
            }
        }

        let policy = Arc::new(policy);
        inner.indexes.insert(&policy);
        inner.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Removes a policy and all its index entries.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no policy has that name.
    pub async fn remove(&self, name: &str) -> SentraResult<Arc<Policy>> {
        let mut inner = self.inner.write().await;
        let policy = inner
            .policies
            .remove(name)
            .ok_or_else(|| SentraError::not_found("policy", name))?;
        inner.indexes.remove(&policy);
        Ok(policy)
    }

    /// Removes every policy and every index entry. Derived roles are kept.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.policies.clear();
        inner.indexes.clear();
    }

    // -------------------------------------------------------------------------
    // Derived roles
    // -------------------------------------------------------------------------

    /// Adds a derived-role definition.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` when the name is taken.
    pub async fn add_derived_role(&self, role: DerivedRole) -> SentraResult<()> {
        let mut inner = self.inner.write().await;
        if inner.derived_roles.contains_key(&role.name) {
            return Err(SentraError::already_exists("derived role", &role.name));
        }
        if let Some(condition) = role.condition.as_deref()
            && let Err(e) = self.conditions.prime(condition)
        {
            tracing::warn!(
                derived_role = %role.name,
                error = %e,
                "Condition failed to compile while priming cache"
            );
        }
        inner.derived_roles.insert(role.name.clone(), Arc::new(role));
        Ok(())
    }

    /// Looks up a derived role by name.
    pub async fn get_derived_role(&self, name: &str) -> Option<Arc<DerivedRole>> {
        self.inner.read().await.derived_roles.get(name).cloned()
    }

    /// Every derived-role definition.
    pub async fn get_derived_roles(&self) -> Vec<Arc<DerivedRole>> {
        self.inner
            .read()
            .await
            .derived_roles
            .values()
            .cloned()
            .collect()
    }

    /// Names of every derived role, for cross-reference validation.
    pub async fn derived_role_names(&self) -> HashSet<String> {
        self.inner
            .read()
            .await
            .derived_roles
            .keys()
            .cloned()
            .collect()
    }

    /// Removes a derived-role definition.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no derived role has that name.
    pub async fn remove_derived_role(&self, name: &str) -> SentraResult<Arc<DerivedRole>> {
        self.inner
            .write()
            .await
            .derived_roles
            .remove(name)
            .ok_or_else(|| SentraError::not_found("derived role", name))
    }

    /// Removes every derived-role definition.
    pub async fn clear_derived_roles(&self) {
        self.inner.write().await.derived_roles.clear();
    }

    /// Number of derived-role definitions.
    pub async fn derived_role_count(&self) -> usize {
        self.inner.read().await.derived_roles.len()
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    /// Counts describing the store's contents.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            policies: inner.policies.len(),
            derived_roles: inner.derived_roles.len(),
            indexes: inner.indexes.stats(),
        }
    }
}

/// Rejects principal policies missing their selectors. This is the store's
/// own last-line check; the validator reports the same problems with full
/// context.
fn check_principal_shape(policy: &Policy) -> SentraResult<()> {
    if !policy.principal_policy {
        return Ok(());
    }

    let mut issues = Vec::new();
    match &policy.principal {
        Some(selector) if !selector.is_empty() => {}
        _ => issues.push(
            ValidationIssue::new(
                IssueTag::Schema,
                "principal policy requires a principal selector with an id or at least one role",
            )
            .for_policy(&policy.name),
        ),
    }
    if policy.resources.is_empty() {
        issues.push(
            ValidationIssue::new(
                IssueTag::Schema,
                "principal policy requires at least one resource selector",
            )
            .for_policy(&policy.name),
        );
    }
    for selector in &policy.resources {
        if selector.kind.is_empty() {
            issues.push(
                ValidationIssue::new(
                    IssueTag::Schema,
                    "resource selector requires a non-empty kind",
                )
                .for_policy(&policy.name),
            );
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(SentraError::validation(issues))
    }
}

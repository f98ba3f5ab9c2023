//! Lookup indexes over the policy set.
//!
//! Four independent structures accelerate the authorization hot path:
//! by resource kind, by (scope, kind), by (principal id, kind), and by
//! (role, kind). Every index holds shared handles (`Arc<Policy>`) to the
//! store's policy values; the store rebuilds index entries under its write
//! lock, so readers never observe a partially indexed policy.
//!
//! Lookups return cloned lists so callers are immune to concurrent removals.
//! Within a bucket, insertion order is preserved; combined lookups list the
//! exact-kind bucket before the `*` bucket and de-duplicate by policy name,
//! keeping the first occurrence.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use sentra_core::policy::{Policy, WILDCARD};

/// Removes later duplicates (by policy name), preserving first occurrence.
fn dedupe_by_name(policies: Vec<Arc<Policy>>) -> Vec<Arc<Policy>> {
    let mut seen = HashSet::with_capacity(policies.len());
    policies
        .into_iter()
        .filter(|p| seen.insert(p.name.clone()))
        .collect()
}

fn remove_from_bucket(bucket: &mut Vec<Arc<Policy>>, name: &str) {
    bucket.retain(|p| p.name != name);
}

// =============================================================================
// Kind index
// =============================================================================

/// `resource kind -> policies governing that kind`.
#[derive(Debug, Default)]
pub struct KindIndex {
    by_kind: HashMap<String, Vec<Arc<Policy>>>,
}

impl KindIndex {
    /// Indexes a policy under its resource kind.
    pub fn insert(&mut self, policy: &Arc<Policy>) {
        self.by_kind
            .entry(policy.resource_kind.clone())
            .or_default()
            .push(Arc::clone(policy));
    }

    /// Removes a policy from the index.
    pub fn remove(&mut self, policy: &Policy) {
        if let Some(bucket) = self.by_kind.get_mut(&policy.resource_kind) {
            remove_from_bucket(bucket, &policy.name);
            if bucket.is_empty() {
                self.by_kind.remove(&policy.resource_kind);
            }
        }
    }

    /// Policies registered for exactly this kind.
    #[must_use]
    pub fn find(&self, kind: &str) -> Vec<Arc<Policy>> {
        self.by_kind.get(kind).cloned().unwrap_or_default()
    }

    /// Number of distinct kinds indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    /// Returns `true` if no kind is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_kind.clear();
    }
}

// =============================================================================
// Scope index
// =============================================================================

/// `scope -> kind -> policies with that (scope, kind)`.
///
/// Policies with an empty scope are not indexed here; those are served from
/// the kind index. Hierarchical resolution (walking up the dotted scope) is
/// the caller's concern.
#[derive(Debug, Default)]
pub struct ScopeIndex {
    by_scope: HashMap<String, HashMap<String, Vec<Arc<Policy>>>>,
}

impl ScopeIndex {
    /// Indexes a scoped policy; unscoped policies are skipped.
    pub fn insert(&mut self, policy: &Arc<Policy>) {
        if policy.scope.is_empty() {
            return;
        }
        self.by_scope
            .entry(policy.scope.clone())
            .or_default()
            .entry(policy.resource_kind.clone())
            .or_default()
            .push(Arc::clone(policy));
    }

    /// Removes a policy from the index.
    pub fn remove(&mut self, policy: &Policy) {
        if policy.scope.is_empty() {
            return;
        }
        if let Some(kinds) = self.by_scope.get_mut(&policy.scope) {
            if let Some(bucket) = kinds.get_mut(&policy.resource_kind) {
                remove_from_bucket(bucket, &policy.name);
                if bucket.is_empty() {
                    kinds.remove(&policy.resource_kind);
                }
            }
            if kinds.is_empty() {
                self.by_scope.remove(&policy.scope);
            }
        }
    }

    /// Policies registered for exactly this `(scope, kind)` pair.
    #[must_use]
    pub fn find(&self, scope: &str, kind: &str) -> Vec<Arc<Policy>> {
        self.by_scope
            .get(scope)
            .and_then(|kinds| kinds.get(kind))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of distinct scopes indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_scope.len()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_scope.clear();
    }
}

// =============================================================================
// Principal index
// =============================================================================

/// `principal id -> resource kind -> principal policies`.
///
/// The `*` kind of a resource selector is stored under the `*` key and
/// consulted on every lookup.
#[derive(Debug, Default)]
pub struct PrincipalIndex {
    by_principal: HashMap<String, HashMap<String, Vec<Arc<Policy>>>>,
}

impl PrincipalIndex {
    /// Indexes a principal policy under its principal id, once per resource
    /// selector kind. Non-principal policies and role-only selectors are
    /// skipped.
    pub fn insert(&mut self, policy: &Arc<Policy>) {
        if !policy.principal_policy {
            return;
        }
        let Some(id) = policy
            .principal
            .as_ref()
            .and_then(|sel| sel.id.as_deref())
            .filter(|id| !id.is_empty())
        else {
            return;
        };

        let kinds = self.by_principal.entry(id.to_string()).or_default();
        for selector in &policy.resources {
            let bucket = kinds.entry(selector.kind.clone()).or_default();
            if !bucket.iter().any(|p| p.name == policy.name) {
                bucket.push(Arc::clone(policy));
            }
        }
    }

    /// Removes a policy from the index.
    pub fn remove(&mut self, policy: &Policy) {
        let Some(id) = policy.principal.as_ref().and_then(|sel| sel.id.as_deref()) else {
            return;
        };
        if let Some(kinds) = self.by_principal.get_mut(id) {
            kinds.retain(|_, bucket| {
                remove_from_bucket(bucket, &policy.name);
                !bucket.is_empty()
            });
            if kinds.is_empty() {
                self.by_principal.remove(id);
            }
        }
    }

    /// Policies for a principal and kind: the `[kind]` bucket followed by the
    /// `[*]` bucket, de-duplicated by name.
    #[must_use]
    pub fn find(&self, principal_id: &str, kind: &str) -> Vec<Arc<Policy>> {
        let Some(kinds) = self.by_principal.get(principal_id) else {
            return Vec::new();
        };
        let mut combined = kinds.get(kind).cloned().unwrap_or_default();
        if kind != WILDCARD && let Some(wildcard) = kinds.get(WILDCARD) {
            combined.extend(wildcard.iter().cloned());
        }
        dedupe_by_name(combined)
    }

    /// Number of distinct principal ids indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_principal.len()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_principal.clear();
    }
}

// =============================================================================
// Role index
// =============================================================================

/// `role -> resource kind -> principal policies`.
///
/// A principal policy is inserted under every role in its selector.
#[derive(Debug, Default)]
pub struct RoleIndex {
    by_role: HashMap<String, HashMap<String, Vec<Arc<Policy>>>>,
}

impl RoleIndex {
    /// Indexes a principal policy under each of its selector roles.
    pub fn insert(&mut self, policy: &Arc<Policy>) {
        if !policy.principal_policy {
            return;
        }
        let Some(selector) = policy.principal.as_ref() else {
            return;
        };
        for role in &selector.roles {
            let kinds = self.by_role.entry(role.clone()).or_default();
            for resource in &policy.resources {
                let bucket = kinds.entry(resource.kind.clone()).or_default();
                if !bucket.iter().any(|p| p.name == policy.name) {
                    bucket.push(Arc::clone(policy));
                }
            }
        }
    }

    /// Removes a policy from the index.
    pub fn remove(&mut self, policy: &Policy) {
        let Some(selector) = policy.principal.as_ref() else {
            return;
        };
        for role in &selector.roles {
            if let Some(kinds) = self.by_role.get_mut(role) {
                kinds.retain(|_, bucket| {
                    remove_from_bucket(bucket, &policy.name);
                    !bucket.is_empty()
                });
                if kinds.is_empty() {
                    self.by_role.remove(role);
                }
            }
        }
    }

    /// Union over `roles` of the `[kind]` and `[*]` buckets, de-duplicated by
    /// name, first occurrence wins.
    #[must_use]
    pub fn find(&self, roles: &[String], kind: &str) -> Vec<Arc<Policy>> {
        let mut combined = Vec::new();
        for role in roles {
            let Some(kinds) = self.by_role.get(role) else {
                continue;
            };
            if let Some(bucket) = kinds.get(kind) {
                combined.extend(bucket.iter().cloned());
            }
            if kind != WILDCARD && let Some(wildcard) = kinds.get(WILDCARD) {
                combined.extend(wildcard.iter().cloned());
            }
        }
        dedupe_by_name(combined)
    }

    /// Number of distinct roles indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_role.len()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_role.clear();
    }
}

// =============================================================================
// Composite
// =============================================================================

/// All four indexes, updated as a unit under the store's write lock.
#[derive(Debug, Default)]
pub struct PolicyIndexes {
    /// Kind index.
    pub kind: KindIndex,
    /// Scope index.
    pub scope: ScopeIndex,
    /// Principal-id index.
    pub principal: PrincipalIndex,
    /// Role index.
    pub role: RoleIndex,
}

/// Sizes of the four indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    /// Distinct resource kinds.
    pub kinds: usize,
    /// Distinct scopes.
    pub scopes: usize,
    /// Distinct principal ids.
    pub principals: usize,
    /// Distinct roles.
    pub roles: usize,
}

impl PolicyIndexes {
    /// Indexes a policy in all four structures.
    pub fn insert(&mut self, policy: &Arc<Policy>) {
        self.kind.insert(policy);
        self.scope.insert(policy);
        self.principal.insert(policy);
        self.role.insert(policy);
    }

    /// Removes a policy from all four structures.
    pub fn remove(&mut self, policy: &Policy) {
        self.kind.remove(policy);
        self.scope.remove(policy);
        self.principal.remove(policy);
        self.role.remove(policy);
    }

    /// Drops every entry from all four structures.
    pub fn clear(&mut self) {
        self.kind.clear();
        self.scope.clear();
        self.principal.clear();
        self.role.clear();
    }

    /// Current sizes.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            kinds: self.kind.len(),
            scopes: self.scope.len(),
            principals: self.principal.len(),
            roles: self.role.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::policy::{PrincipalSelector, ResourceSelector, Rule};

    fn resource_policy(name: &str, kind: &str, scope: &str) -> Arc<Policy> {
        Arc::new(
            Policy::resource(name, kind)
                .with_scope(scope)
                .with_rule(Rule::allow("r", ["read"])),
        )
    }

    fn principal_policy(name: &str, id: Option<&str>, roles: &[&str], kinds: &[&str]) -> Arc<Policy> {
        let selector = PrincipalSelector {
            id: id.map(String::from),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
        };
        let resources = kinds
            .iter()
            .map(|k| ResourceSelector::kind(*k))
            .collect();
        Arc::new(
            Policy::principal(name, selector, resources).with_rule(Rule::allow("r", ["read"])),
        )
    }

    #[test]
    fn test_kind_index_insert_find_remove() {
        let mut index = KindIndex::default();
        let p1 = resource_policy("p1", "document", "");
        let p2 = resource_policy("p2", "document", "");
        index.insert(&p1);
        index.insert(&p2);

        let found = index.find("document");
        assert_eq!(found.len(), 2);
        // Insertion order preserved.
        assert_eq!(found[0].name, "p1");
        assert_eq!(found[1].name, "p2");

        index.remove(&p1);
        assert_eq!(index.find("document").len(), 1);
        index.remove(&p2);
        assert!(index.is_empty());
    }

    #[test]
    fn test_scope_index_skips_empty_scope() {
        let mut index = ScopeIndex::default();
        index.insert(&resource_policy("global", "document", ""));
        assert_eq!(index.len(), 0);

        let scoped = resource_policy("scoped", "document", "acme.corp");
        index.insert(&scoped);
        assert_eq!(index.find("acme.corp", "document").len(), 1);
        // Exact (scope, kind) only; no hierarchy walking here.
        assert!(index.find("acme", "document").is_empty());
        assert!(index.find("acme.corp", "file").is_empty());
    }

    #[test]
    fn test_principal_index_wildcard_fallback() {
        let mut index = PrincipalIndex::default();
        let doc = principal_policy("alice_docs", Some("alice"), &[], &["document"]);
        let any = principal_policy("alice_any", Some("alice"), &[], &["*"]);
        index.insert(&doc);
        index.insert(&any);

        let found = index.find("alice", "document");
        assert_eq!(found.len(), 2);
        // [kind] entries come before [*] entries.
        assert_eq!(found[0].name, "alice_docs");
        assert_eq!(found[1].name, "alice_any");

        assert_eq!(index.find("alice", "file").len(), 1);
        assert!(index.find("bob", "document").is_empty());
    }

    #[test]
    fn test_principal_index_dedupes_by_name() {
        let mut index = PrincipalIndex::default();
        // Same policy selects document twice and *, so it appears in two
        // buckets; the lookup must report it once.
        let p = principal_policy("alice_all", Some("alice"), &[], &["document", "*"]);
        index.insert(&p);
        assert_eq!(index.find("alice", "document").len(), 1);
    }

    #[test]
    fn test_principal_index_ignores_role_only_selectors() {
        let mut index = PrincipalIndex::default();
        index.insert(&principal_policy("role_based", None, &["admin"], &["document"]));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_role_index_union_over_roles() {
        let mut index = RoleIndex::default();
        let admin = principal_policy("admins", None, &["admin"], &["document"]);
        let auditor = principal_policy("auditors", None, &["auditor"], &["*"]);
        let both = principal_policy("both", None, &["admin", "auditor"], &["document"]);
        index.insert(&admin);
        index.insert(&auditor);
        index.insert(&both);

        let roles = vec!["admin".to_string(), "auditor".to_string()];
        let found = index.find(&roles, "document");
        assert_eq!(found.len(), 3);
        // First occurrence wins: admin bucket order, then auditor wildcard.
        assert_eq!(found[0].name, "admins");
        assert_eq!(found[1].name, "both");
        assert_eq!(found[2].name, "auditors");

        let found = index.find(&["auditor".to_string()], "file");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "auditors");
    }

    #[test]
    fn test_role_index_remove() {
        let mut index = RoleIndex::default();
        let p = principal_policy("admins", None, &["admin", "root"], &["document"]);
        index.insert(&p);
        assert_eq!(index.len(), 2);

        index.remove(&p);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_composite_insert_and_clear() {
        let mut indexes = PolicyIndexes::default();
        indexes.insert(&resource_policy("p1", "document", "acme"));
        indexes.insert(&principal_policy(
            "alice_docs",
            Some("alice"),
            &["admin"],
            &["document"],
        ));

        let stats = indexes.stats();
        assert_eq!(stats.kinds, 2); // "document" and the principal policy's "*"
        assert_eq!(stats.scopes, 1);
        assert_eq!(stats.principals, 1);
        assert_eq!(stats.roles, 1);

        indexes.clear();
        assert_eq!(indexes.stats().kinds, 0);
    }

    #[test]
    fn test_lookup_returns_copies() {
        let mut index = KindIndex::default();
        let p = resource_policy("p1", "document", "");
        index.insert(&p);

        let snapshot = index.find("document");
        index.remove(&p);
        // The earlier snapshot is unaffected by the removal.
        assert_eq!(snapshot.len(), 1);
        assert!(index.find("document").is_empty());
    }
}

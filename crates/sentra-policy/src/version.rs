//! Bounded store of checksummed policy snapshots.
//!
//! Every save deep-copies the policy map, checksums a canonical rendering of
//! it, and either appends a new numbered version or, when the checksum equals
//! the most recent version's, returns that version unchanged. At most
//! `max_versions` snapshots are retained; the oldest is discarded first.
//! Version numbers are monotonic within one store lifetime and are never
//! reused after eviction or `clear`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use sentra_core::policy::Policy;
use sentra_core::{SentraError, SentraResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::config::VersionConfig;

/// An immutable snapshot of the full policy set.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyVersion {
    /// Monotonically assigned version number, starting at 1.
    pub version: u64,

    /// When the snapshot was saved.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    /// The frozen policy map, keyed by name.
    pub policies: BTreeMap<String, Policy>,

    /// SHA-256 checksum of the canonical rendering of `policies`.
    pub checksum: String,

    /// Human comment describing the change.
    pub comment: String,
}

/// Counts describing the version store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStoreStats {
    /// Number of retained versions.
    pub count: usize,
    /// Retention bound.
    pub max_versions: usize,
    /// Newest retained version number.
    pub current_version: Option<u64>,
    /// Oldest retained version number.
    pub oldest_version: Option<u64>,
    /// Total policies across retained versions.
    pub total_policies: usize,
}

struct VersionInner {
    versions: VecDeque<Arc<PolicyVersion>>,
    last_assigned: u64,
}

/// Bounded ring of policy snapshots.
pub struct VersionStore {
    inner: RwLock<VersionInner>,
    max_versions: usize,
}

impl VersionStore {
    /// Creates a store retaining at most `config.max_versions` snapshots
    /// (minimum one).
    #[must_use]
    pub fn new(config: &VersionConfig) -> Self {
        Self {
            inner: RwLock::new(VersionInner {
                versions: VecDeque::new(),
                last_assigned: 0,
            }),
            max_versions: config.retention(),
        }
    }

    /// The retention bound.
    #[must_use]
    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Saves a snapshot of `policies`.
    ///
    /// When the canonical checksum equals the most recent version's, that
    /// version is returned unchanged and no number is consumed.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when canonical serialization fails.
    pub async fn save(
        &self,
        policies: &BTreeMap<String, Policy>,
        comment: &str,
    ) -> SentraResult<Arc<PolicyVersion>> {
        let checksum = compute_checksum(policies)?;

        let mut inner = self.inner.write().await;
        if let Some(current) = inner.versions.back()
            && current.checksum == checksum
        {
            tracing::debug!(
                version = current.version,
                "Snapshot unchanged, reusing current version"
            );
            return Ok(Arc::clone(current));
        }

        inner.last_assigned += 1;
        let version = Arc::new(PolicyVersion {
            version: inner.last_assigned,
            timestamp: OffsetDateTime::now_utc(),
            policies: policies.clone(),
            checksum,
            comment: comment.to_string(),
        });

        inner.versions.push_back(Arc::clone(&version));
        while inner.versions.len() > self.max_versions {
            let evicted = inner.versions.pop_front();
            if let Some(evicted) = evicted {
                tracing::debug!(version = evicted.version, "Evicted oldest policy version");
            }
        }

        tracing::info!(
            version = version.version,
            policies = version.policies.len(),
            comment = %version.comment,
            "Policy version saved"
        );
        Ok(version)
    }

    /// Fetches a retained version by number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the version was never assigned or has been
    /// evicted.
    pub async fn get(&self, version: u64) -> SentraResult<Arc<PolicyVersion>> {
        self.inner
            .read()
            .await
            .versions
            .iter()
            .find(|v| v.version == version)
            .cloned()
            .ok_or_else(|| SentraError::not_found("version", version.to_string()))
    }

    /// The most recent version, if any.
    pub async fn current(&self) -> Option<Arc<PolicyVersion>> {
        self.inner.read().await.versions.back().cloned()
    }

    /// The version before the most recent one, if any.
    pub async fn previous(&self) -> Option<Arc<PolicyVersion>> {
        let inner = self.inner.read().await;
        let len = inner.versions.len();
        if len >= 2 {
            inner.versions.get(len - 2).cloned()
        } else {
            None
        }
    }

    /// Every retained version in ascending version order.
    pub async fn list(&self) -> Vec<Arc<PolicyVersion>> {
        self.inner.read().await.versions.iter().cloned().collect()
    }

    /// Number of retained versions.
    pub async fn count(&self) -> usize {
        self.inner.read().await.versions.len()
    }

    /// Discards every retained version. The version counter keeps running so
    /// numbers are never reused.
    pub async fn clear(&self) {
        self.inner.write().await.versions.clear();
    }

    /// Counts describing the store.
    pub async fn stats(&self) -> VersionStoreStats {
        let inner = self.inner.read().await;
        VersionStoreStats {
            count: inner.versions.len(),
            max_versions: self.max_versions,
            current_version: inner.versions.back().map(|v| v.version),
            oldest_version: inner.versions.front().map(|v| v.version),
            total_policies: inner.versions.iter().map(|v| v.policies.len()).sum(),
        }
    }
}

/// Canonical SHA-256 checksum of a policy map.
///
/// Names are iterated in lexicographic order (the `BTreeMap` order); each
/// entry contributes its name, a NUL separator, the policy's canonical JSON
/// (struct fields in declaration order, no maps involved), and a newline.
///
/// # Errors
///
/// Returns `Internal` when a policy fails to serialize.
pub fn compute_checksum(policies: &BTreeMap<String, Policy>) -> SentraResult<String> {
    let mut hasher = Sha256::new();
    for (name, policy) in policies {
        let encoded = serde_json::to_vec(policy).map_err(|e| {
            SentraError::internal(format!("failed to serialize policy '{name}': {e}"))
        })?;
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(&encoded);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::error::ErrorKind;
    use sentra_core::policy::Rule;

    fn snapshot(entries: &[(&str, &str)]) -> BTreeMap<String, Policy> {
        entries
            .iter()
            .map(|(name, scope)| {
                (
                    (*name).to_string(),
                    Policy::resource(*name, "document")
                        .with_scope(*scope)
                        .with_rule(Rule::allow("r", ["read"])),
                )
            })
            .collect()
    }

    fn store(max_versions: usize) -> VersionStore {
        VersionStore::new(&VersionConfig { max_versions })
    }

    #[test]
    fn test_checksum_deterministic_and_content_sensitive() {
        let a = snapshot(&[("p1", "v1"), ("p2", "")]);
        let b = snapshot(&[("p2", ""), ("p1", "v1")]);
        assert_eq!(
            compute_checksum(&a).unwrap(),
            compute_checksum(&b).unwrap()
        );

        let c = snapshot(&[("p1", "v2"), ("p2", "")]);
        assert_ne!(
            compute_checksum(&a).unwrap(),
            compute_checksum(&c).unwrap()
        );
        assert_eq!(compute_checksum(&a).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_save_assigns_monotonic_versions() {
        let store = store(10);
        let v1 = store.save(&snapshot(&[("p1", "a")]), "first").await.unwrap();
        let v2 = store.save(&snapshot(&[("p1", "b")]), "second").await.unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(store.count().await, 2);
        assert_eq!(store.current().await.unwrap().version, 2);
        assert_eq!(store.previous().await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_identical_save_is_deduped() {
        let store = store(10);
        let map = snapshot(&[("p1", "")]);

        let first = store.save(&map, "first").await.unwrap();
        assert_eq!(first.version, 1);

        let again = store.save(&map, "again").await.unwrap();
        assert_eq!(again.version, 1);
        // The original comment is kept; nothing new was stored.
        assert_eq!(again.comment, "first");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_retention_bound_drops_oldest() {
        let store = store(3);
        for i in 0..5 {
            store
                .save(&snapshot(&[("p1", &format!("scope{i}"))]), "c")
                .await
                .unwrap();
        }

        assert_eq!(store.count().await, 3);
        let stats = store.stats().await;
        assert_eq!(stats.oldest_version, Some(3));
        assert_eq!(stats.current_version, Some(5));

        let err = store.get(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.get(4).await.unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let store = store(10);
        let map = snapshot(&[("p1", "v1"), ("p2", "")]);
        let saved = store.save(&map, "round trip").await.unwrap();

        let fetched = store.get(saved.version).await.unwrap();
        assert_eq!(fetched.policies, map);
        assert_eq!(fetched.comment, "round trip");
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_caller() {
        let store = store(10);
        let mut map = snapshot(&[("p1", "v1")]);
        let saved = store.save(&map, "c").await.unwrap();

        // Mutating the caller's map must not affect the stored snapshot.
        map.get_mut("p1").unwrap().scope = "mutated".to_string();
        assert_eq!(saved.policies["p1"].scope, "v1");
        assert_eq!(store.get(saved.version).await.unwrap().policies["p1"].scope, "v1");
    }

    #[tokio::test]
    async fn test_clear_keeps_counter() {
        let store = store(10);
        store.save(&snapshot(&[("p1", "a")]), "c").await.unwrap();
        store.clear().await;
        assert_eq!(store.count().await, 0);

        let next = store.save(&snapshot(&[("p1", "b")]), "c").await.unwrap();
        assert_eq!(next.version, 2);
    }

    #[tokio::test]
    async fn test_list_ascending() {
        let store = store(10);
        for scope in ["a", "b", "c"] {
            store.save(&snapshot(&[("p1", scope)]), "c").await.unwrap();
        }
        let versions: Vec<u64> = store.list().await.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_minimum_retention_is_one() {
        let store = store(0);
        assert_eq!(store.max_versions(), 1);
        store.save(&snapshot(&[("p1", "a")]), "c").await.unwrap();
        store.save(&snapshot(&[("p1", "b")]), "c").await.unwrap();
        assert_eq!(store.count().await, 1);
        assert_eq!(store.current().await.unwrap().version, 2);
    }
}

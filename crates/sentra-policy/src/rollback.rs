//! Atomic update-with-rollback over the policy store.
//!
//! The rollback manager is the only supported path for bulk policy changes.
//! An update snapshots the current store, validates the incoming batch,
//! replaces the store contents, saves the new snapshot, and announces the
//! change. Any failure after the store was touched restores the pre-update
//! snapshot; only a failure of that restore is fatal, and the error then
//! reports both causes.

use std::collections::BTreeMap;
use std::sync::Arc;

use sentra_core::events::{ChangeEvent, ChangeNotifier};
use sentra_core::policy::Policy;
use sentra_core::{SentraError, SentraResult};

use crate::store::{PolicyStore, StoreStats};
use crate::validator::PolicyValidator;
use crate::version::{PolicyVersion, VersionStore, VersionStoreStats};

/// Combined store and version-store counts.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    /// Policy store counts.
    pub store: StoreStats,
    /// Version store counts.
    pub versions: VersionStoreStats,
}

/// Coordinates store, validator, version store, and notifier into an atomic
/// update path.
pub struct RollbackManager {
    store: Arc<PolicyStore>,
    versions: Arc<VersionStore>,
    validator: Arc<PolicyValidator>,
    notifier: Arc<ChangeNotifier>,
}

impl RollbackManager {
    /// Creates a manager over its four collaborators.
    #[must_use]
    pub fn new(
        store: Arc<PolicyStore>,
        versions: Arc<VersionStore>,
        validator: Arc<PolicyValidator>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            versions,
            validator,
            notifier,
        }
    }

    /// Replaces the full policy set atomically.
    ///
    /// Protocol: snapshot the current store and save it as the pre-update
    /// version; validate the batch; replace the store contents; save the new
    /// snapshot; announce the change. On a mid-replace failure the pre-update
    /// snapshot is restored.
    ///
    /// # Errors
    ///
    /// - `Validation` when the batch is rejected; nothing was mutated.
    /// - The forward step's error when it failed but the restore succeeded.
    /// - `FatalRollback` when the restore failed too; the store may be
    ///   inconsistent.
    pub async fn update_with_rollback(
        &self,
        new_policies: Vec<Policy>,
        comment: &str,
    ) -> SentraResult<Arc<PolicyVersion>> {
        // 1. Snapshot the current contents so there is something to restore.
        let pre = self.store.snapshot().await;
        self.save_and_announce(&pre, &format!("Pre-update snapshot: {comment}"))
            .await?;

        // 2. Validate before touching the store.
        let known_roles = self.store.derived_role_names().await;
        let outcome = self
            .validator
            .validate_batch(&new_policies, &[], &known_roles);
        if !outcome.valid() {
            let names = new_policies.iter().map(|p| p.name.clone()).collect();
            let detail = serde_json::to_value(&outcome.errors).unwrap_or_default();
            self.notifier
                .publish(ChangeEvent::validation_failed(names, detail));
            tracing::warn!(
                errors = outcome.errors.len(),
                comment = %comment,
                "Policy update rejected by validation"
            );
            return Err(SentraError::validation(outcome.errors));
        }

        // 3. Replace the store contents.
        self.store.clear().await;
        for policy in &new_policies {
            if let Err(update_err) = self.store.add(policy.clone()).await {
                tracing::error!(
                    policy = %policy.name,
                    error = %update_err,
                    "Policy replace failed mid-sequence, restoring snapshot"
                );
                return Err(match self.restore(&pre).await {
                    Ok(()) => update_err,
                    Err(rollback_err) => {
                        SentraError::fatal_rollback(update_err, rollback_err)
                    }
                });
            }
        }

        // 4. Save the new snapshot.
        let map: BTreeMap<String, Policy> = new_policies
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let version = match self.save_and_announce(&map, comment).await {
            Ok(version) => version,
            Err(update_err) => {
                return Err(match self.restore(&pre).await {
                    Ok(()) => update_err,
                    Err(rollback_err) => {
                        SentraError::fatal_rollback(update_err, rollback_err)
                    }
                });
            }
        };

        let names = map.keys().cloned().collect();
        self.notifier
            .publish(ChangeEvent::updated(version.version, names, comment));
        tracing::info!(
            version = version.version,
            policies = version.policies.len(),
            comment = %comment,
            "Policy set updated"
        );
        Ok(version)
    }

    /// Restores the policy set from a stored version.
    ///
    /// The closing save deduplicates by checksum against the current head, so
    /// a rollback that lands on identical content consumes no new number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the target version is gone, or the store's
    /// error when re-adding a policy failed.
    pub async fn rollback(&self, target_version: u64) -> SentraResult<Arc<PolicyVersion>> {
        let target = self.versions.get(target_version).await?;

        self.store.clear().await;
        for policy in target.policies.values() {
            self.store.add(policy.clone()).await?;
        }

        let saved = self
            .save_and_announce(
                &target.policies,
                &format!("Rollback to version {target_version}"),
            )
            .await?;

        let names = target.policies.keys().cloned().collect();
        self.notifier
            .publish(ChangeEvent::rolled_back(target_version, names));
        tracing::info!(
            target = target_version,
            saved = saved.version,
            "Policy set rolled back"
        );
        Ok(saved)
    }

    /// Rolls back to the version before the current one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when fewer than two versions are retained.
    pub async fn rollback_to_previous(&self) -> SentraResult<Arc<PolicyVersion>> {
        let previous = self
            .versions
            .previous()
            .await
            .ok_or_else(|| SentraError::not_found("version", "previous"))?;
        self.rollback(previous.version).await
    }

    /// Every retained version, ascending.
    pub async fn list_versions(&self) -> Vec<Arc<PolicyVersion>> {
        self.versions.list().await
    }

    /// Fetches a retained version by number.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the version is not retained.
    pub async fn get_version(&self, version: u64) -> SentraResult<Arc<PolicyVersion>> {
        self.versions.get(version).await
    }

    /// The most recent version, if any.
    pub async fn current_version(&self) -> Option<Arc<PolicyVersion>> {
        self.versions.current().await
    }

    /// Combined store and version-store counts.
    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            store: self.store.stats().await,
            versions: self.versions.stats().await,
        }
    }

    /// Saves a snapshot and announces the version when a new number was
    /// assigned (a deduplicated save announces nothing).
    async fn save_and_announce(
        &self,
        policies: &BTreeMap<String, Policy>,
        comment: &str,
    ) -> SentraResult<Arc<PolicyVersion>> {
        let head_before = self.versions.current().await.map(|v| v.version);
        let saved = self.versions.save(policies, comment).await?;
        if head_before != Some(saved.version) {
            self.notifier
                .publish(ChangeEvent::version_created(saved.version, comment));
        }
        Ok(saved)
    }

    /// Puts the pre-update snapshot back.
    async fn restore(&self, pre: &BTreeMap<String, Policy>) -> SentraResult<()> {
        self.store.clear().await;
        for policy in pre.values() {
            self.store.add(policy.clone()).await?;
        }
        Ok(())
    }
}

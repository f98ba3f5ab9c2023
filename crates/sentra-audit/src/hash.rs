//! The audit hash chain.
//!
//! The chain head is a single hex digest. Hashing an event links it to the
//! head via `prev_hash`; advancing the head is a separate, explicit step so
//! the pipeline can decide exactly when an event counts as accepted.
//! [`verify_chain`] recomputes everything offline.

use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::event::{AuditEvent, canonical_json};

/// SHA-256 of an event's canonical rendering, lowercase hex.
#[must_use]
pub fn hash_event(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(event).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct ChainHead {
    last_hash: String,
    initialized: bool,
}

/// Tracks the hash of the most recent accepted event.
///
/// A fresh chain starts with the empty genesis marker. Two pipelines must
/// never share one chain; the head is owned by exactly one ingest path.
#[derive(Default)]
pub struct HashChain {
    head: RwLock<ChainHead>,
}

impl HashChain {
    /// Creates a chain at genesis.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the head from a persisted hash (startup recovery).
    pub fn initialize_with_hash(&self, last_hash: impl Into<String>) {
        let mut head = self.head.write().unwrap();
        head.last_hash = last_hash.into();
        head.initialized = true;
    }

    /// Links `event` to the current head and computes its hash.
    ///
    /// Sets `event.prev_hash` to the head and `event.hash` to the digest of
    /// the canonical rendering, then returns the digest. The head itself is
    /// not advanced; call [`Self::update_last_hash`] once the event has been
    /// accepted.
    pub fn compute_event_hash(&self, event: &mut AuditEvent) -> String {
        let prev = self.head.read().unwrap().last_hash.clone();
        event.prev_hash = prev;
        let digest = hash_event(event);
        event.hash = digest.clone();
        digest
    }

    /// Advances the head to `hash`.
    pub fn update_last_hash(&self, hash: impl Into<String>) {
        let mut head = self.head.write().unwrap();
        head.last_hash = hash.into();
        head.initialized = true;
    }

    /// The current head (empty at genesis).
    #[must_use]
    pub fn last_hash(&self) -> String {
        self.head.read().unwrap().last_hash.clone()
    }

    /// Whether the head was ever seeded or advanced.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.head.read().unwrap().initialized
    }

    /// Recomputes an event's hash and compares it with the stored one.
    #[must_use]
    pub fn verify_event_hash(&self, event: &AuditEvent) -> bool {
        hash_event(event) == event.hash
    }
}

impl std::fmt::Debug for HashChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.head.read().unwrap();
        f.debug_struct("HashChain")
            .field("last_hash", &head.last_hash)
            .field("initialized", &head.initialized)
            .finish()
    }
}

/// Verifies a full chain offline.
///
/// Recomputes every event's hash and checks the `prev_hash` linkage,
/// starting from an empty genesis marker. Returns `(true, -1)` for an intact
/// chain, or `(false, i)` with the index of the first broken event.
#[must_use]
pub fn verify_chain(events: &[AuditEvent]) -> (bool, i64) {
    for (i, event) in events.iter().enumerate() {
        if hash_event(event) != event.hash {
            return (false, i as i64);
        }
        let intact = match i {
            0 => event.prev_hash.is_empty(),
            _ => event.prev_hash == events[i - 1].hash,
        };
        if !intact {
            return (false, i as i64);
        }
    }
    (true, -1)
}

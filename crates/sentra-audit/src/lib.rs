//! # sentra-audit
//!
//! Tamper-evident audit pipeline for the Sentra authorization engine.
//!
//! Audit events are chained by SHA-256: every event's `prev_hash` equals the
//! hash of the previous accepted event, so any later tampering is detectable
//! by recomputation. Ingest is non-blocking — a bounded buffer absorbs
//! bursts, a background batcher drains it into a durable store, and a full
//! buffer drops the event rather than stalling authorization.
//!
//! ## Modules
//!
//! - [`event`] - Audit event model and canonical hashing serialization
//! - [`hash`] - The hash chain and offline chain verification
//! - [`store`] - Durable-store seam and the in-memory implementation
//! - [`pipeline`] - The [`pipeline::AuditService`] ingest/drain pipeline
//! - [`bridge`] - Policy-change events recorded as audit events
//! - [`config`] - Pipeline configuration

pub mod bridge;
pub mod config;
pub mod event;
pub mod hash;
pub mod pipeline;
pub mod store;

pub use bridge::record_policy_changes;
pub use config::AuditConfig;
pub use event::{AuditEvent, AuditEventType, canonical_json};
pub use hash::{HashChain, hash_event, verify_chain};
pub use pipeline::{AuditMetrics, AuditService, IntegrityReport, PipelineState};
pub use store::{AuditEventStore, AuditQueryFilter, AuditStatistics, MemoryAuditStore, QueryPage};

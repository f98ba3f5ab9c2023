//! Durable event store seam.
//!
//! The pipeline treats persistence as a collaborator: anything that can
//! store and query events behind [`AuditEventStore`] works. The in-memory
//! implementation backs tests and single-process deployments.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sentra_core::SentraResult;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::event::{AuditEvent, AuditEventType};

// =============================================================================
// Query filter
// =============================================================================

/// Filter for querying stored events.
#[derive(Debug, Default, Clone)]
pub struct AuditQueryFilter {
    /// Restrict to one tenant.
    pub tenant_id: Option<String>,

    /// Restrict to these event types (empty = all).
    pub event_types: Vec<AuditEventType>,

    /// Restrict to one actor.
    pub actor_id: Option<String>,

    /// Restrict to one request correlation id.
    pub request_id: Option<String>,

    /// Restrict by outcome.
    pub success: Option<bool>,

    /// Inclusive lower bound on the timestamp.
    pub from: Option<OffsetDateTime>,

    /// Inclusive upper bound on the timestamp.
    pub to: Option<OffsetDateTime>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of matching events to skip.
    pub offset: Option<usize>,
}

impl AuditQueryFilter {
    /// Empty filter matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Restricts to these event types.
    #[must_use]
    pub fn with_event_types(mut self, event_types: Vec<AuditEventType>) -> Self {
        self.event_types = event_types;
        self
    }

    /// Restricts to one actor.
    #[must_use]
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Restricts by outcome.
    #[must_use]
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// Restricts to a time window (either bound optional).
    #[must_use]
    pub fn with_window(mut self, from: Option<OffsetDateTime>, to: Option<OffsetDateTime>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Applies pagination.
    #[must_use]
    pub fn with_pagination(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Whether an event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(tenant) = &self.tenant_id
            && &event.tenant_id != tenant
        {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(actor) = &self.actor_id
            && &event.actor_id != actor
        {
            return false;
        }
        if let Some(request) = &self.request_id
            && &event.request_id != request
        {
            return false;
        }
        if let Some(success) = self.success
            && event.success != success
        {
            return false;
        }
        if let Some(from) = self.from
            && event.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to
            && event.timestamp > to
        {
            return false;
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage {
    /// Matching events in storage order.
    pub events: Vec<AuditEvent>,

    /// Total matches before pagination.
    pub total_count: usize,

    /// Whether more matches exist past this page.
    pub has_more: bool,
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate statistics over one tenant's recent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStatistics {
    /// The tenant the statistics cover.
    pub tenant_id: String,

    /// The window the statistics cover, ending now.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Events in the window.
    pub total_events: usize,

    /// Failed events in the window.
    pub failed_events: usize,

    /// Events per type, keyed by wire name.
    pub by_type: BTreeMap<String, usize>,

    /// Distinct actors seen in the window.
    pub unique_actors: usize,
}

// =============================================================================
// Store seam
// =============================================================================

/// Durable storage for audit events.
///
/// Implementations persist every field of [`AuditEvent`], including
/// `prev_hash` and `hash`, and should index by `(tenant_id, timestamp)` for
/// efficient query.
#[async_trait]
pub trait AuditEventStore: Send + Sync {
    /// Prepares the backing schema; idempotent.
    async fn initialize_schema(&self) -> SentraResult<()>;

    /// Persists one event.
    async fn store(&self, event: &AuditEvent) -> SentraResult<()>;

    /// Queries stored events.
    async fn query(&self, filter: &AuditQueryFilter) -> SentraResult<QueryPage>;

    /// The hash of the most recently stored event for a tenant, if any.
    async fn get_last_hash(&self, tenant_id: &str) -> SentraResult<Option<String>>;

    /// Aggregates statistics for a tenant over a window ending now.
    async fn get_statistics(
        &self,
        tenant_id: &str,
        window: Duration,
    ) -> SentraResult<AuditStatistics>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// In-memory [`AuditEventStore`] keeping events in arrival order.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl AuditEventStore for MemoryAuditStore {
    async fn initialize_schema(&self) -> SentraResult<()> {
        Ok(())
    }

    async fn store(&self, event: &AuditEvent) -> SentraResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditQueryFilter) -> SentraResult<QueryPage> {
        let events = self.events.read().await;
        let matches: Vec<&AuditEvent> = events.iter().filter(|e| filter.matches(e)).collect();
        let total_count = matches.len();

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        let page: Vec<AuditEvent> = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        let has_more = offset + page.len() < total_count;

        Ok(QueryPage {
            events: page,
            total_count,
            has_more,
        })
    }

    async fn get_last_hash(&self, tenant_id: &str) -> SentraResult<Option<String>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .rev()
            .find(|e| e.tenant_id == tenant_id)
            .map(|e| e.hash.clone()))
    }

    async fn get_statistics(
        &self,
        tenant_id: &str,
        window: Duration,
    ) -> SentraResult<AuditStatistics> {
        let cutoff = OffsetDateTime::now_utc() - window;
        let events = self.events.read().await;

        let mut total_events = 0;
        let mut failed_events = 0;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut actors: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for event in events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.timestamp >= cutoff)
        {
            total_events += 1;
            if !event.success {
                failed_events += 1;
            }
            *by_type
                .entry(event.event_type.as_str().to_string())
                .or_default() += 1;
            actors.insert(event.actor_id.as_str());
        }

        Ok(AuditStatistics {
            tenant_id: tenant_id.to_string(),
            window,
            total_events,
            failed_events,
            by_type,
            unique_actors: actors.len(),
        })
    }
}

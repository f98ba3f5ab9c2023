//! The audit ingest/drain pipeline.
//!
//! `log` hashes the event against the chain head and drops it into a bounded
//! buffer without ever waiting on storage; the head advances only when the
//! buffer accepted the event, so dropped events leave no trace in the chain.
//! A background task drains the buffer into the durable store in batches,
//! flushing when the batch fills, on a periodic tick, and at shutdown. A
//! per-event storage fault skips that event and continues; the verifier will
//! flag the resulting gap, which is a storage-level fault, not a chain bug.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sentra_core::{SentraError, SentraResult};
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::config::AuditConfig;
use crate::event::AuditEvent;
use crate::hash::{HashChain, hash_event};
use crate::store::{AuditEventStore, AuditQueryFilter, AuditStatistics, QueryPage};

// =============================================================================
// State & metrics
// =============================================================================

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting events.
    Running,
    /// Shutdown signalled; the buffer is being drained.
    Draining,
    /// Drained and stopped.
    Stopped,
}

const STATE_RUNNING: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Counters and timings describing the pipeline.
#[derive(Debug, Clone)]
pub struct AuditMetrics {
    /// Events accepted into the buffer (or stored synchronously).
    pub events_logged: u64,
    /// Events dropped because the buffer was full.
    pub events_dropped: u64,
    /// Events the durable store rejected.
    pub events_failed: u64,
    /// Events successfully stored.
    pub events_stored: u64,
    /// Events currently waiting in the buffer.
    pub buffer_used: usize,
    /// When the last flush finished.
    pub last_flush_time: Option<OffsetDateTime>,
    /// How long the last flush took.
    pub last_flush_duration: Option<Duration>,
    /// Hash of the most recently stored event.
    pub durable_head: String,
    /// Current lifecycle state.
    pub state: PipelineState,
}

/// Result of a chain verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Whether the chain verified.
    pub ok: bool,
    /// Index of the first broken event, or -1.
    pub broken_index: i64,
    /// How many events were checked.
    pub events_checked: usize,
}

#[derive(Default)]
struct Counters {
    logged: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    stored: AtomicU64,
}

#[derive(Default)]
struct FlushInfo {
    last_flush_time: Option<OffsetDateTime>,
    last_flush_duration: Option<Duration>,
    durable_head: String,
}

struct Shared {
    store: Arc<dyn AuditEventStore>,
    config: AuditConfig,
    chain: HashChain,
    counters: Counters,
    flush: std::sync::RwLock<FlushInfo>,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> PipelineState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => PipelineState::Running,
            STATE_DRAINING => PipelineState::Draining,
            _ => PipelineState::Stopped,
        }
    }

    fn set_state(&self, state: PipelineState) {
        let raw = match state {
            PipelineState::Running => STATE_RUNNING,
            PipelineState::Draining => STATE_DRAINING,
            PipelineState::Stopped => STATE_STOPPED,
        };
        self.state.store(raw, Ordering::Release);
    }
}

// =============================================================================
// Service
// =============================================================================

/// Tamper-evident audit pipeline over a durable event store.
pub struct AuditService {
    shared: Arc<Shared>,
    tx: mpsc::Sender<AuditEvent>,
    /// Serializes hash + enqueue so events are hashed in acceptance order.
    ingest: Mutex<()>,
    rx: std::sync::Mutex<Option<mpsc::Receiver<AuditEvent>>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditService {
    /// Creates a pipeline over `store`. Events are accepted immediately;
    /// call [`Self::start`] to begin draining them.
    #[must_use]
    pub fn new(store: Arc<dyn AuditEventStore>, config: AuditConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.buffer_size.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                chain: HashChain::new(),
                counters: Counters::default(),
                flush: std::sync::RwLock::new(FlushInfo::default()),
                state: AtomicU8::new(STATE_RUNNING),
            }),
            tx,
            ingest: Mutex::new(()),
            rx: std::sync::Mutex::new(Some(rx)),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// The hash chain this pipeline owns.
    #[must_use]
    pub fn chain(&self) -> &HashChain {
        &self.shared.chain
    }

    /// Seeds the chain head from the durable store (startup recovery).
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn recover_chain_head(&self, tenant_id: &str) -> SentraResult<()> {
        if let Some(hash) = self.shared.store.get_last_hash(tenant_id).await? {
            self.shared.chain.initialize_with_hash(&hash);
            tracing::info!(tenant = %tenant_id, "Audit chain head recovered");
        }
        Ok(())
    }

    /// Spawns the background drain task. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let Some(rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(drain_loop(shared, rx, shutdown_rx));
        *self.worker.lock().await = Some(handle);
    }

    /// Hashes an event and enqueues it without blocking on storage.
    ///
    /// Returns the event's hash. The chain head advances only when the
    /// buffer accepted the event.
    ///
    /// # Errors
    ///
    /// - `BufferFull` when the buffer had no room; the event was dropped and
    ///   counted, and the chain is untouched.
    /// - `Cancelled` when the pipeline is draining or stopped.
    pub async fn log(&self, mut event: AuditEvent) -> SentraResult<String> {
        if self.shared.state() != PipelineState::Running {
            return Err(SentraError::cancelled("audit pipeline is shutting down"));
        }

        let _guard = self.ingest.lock().await;
        let hash = self.shared.chain.compute_event_hash(&mut event);
        match self.tx.try_send(event) {
            Ok(()) => {
                self.shared.chain.update_last_hash(&hash);
                self.shared.counters.logged.fetch_add(1, Ordering::Relaxed);
                Ok(hash)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    capacity = self.shared.config.buffer_size,
                    "Audit buffer full, event dropped"
                );
                Err(SentraError::buffer_full(self.shared.config.buffer_size))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SentraError::cancelled("audit pipeline stopped"))
            }
        }
    }

    /// Hashes an event and writes it straight to the durable store.
    ///
    /// The chain head advances only after the store confirmed the write.
    ///
    /// # Errors
    ///
    /// - `DeadlineExceeded` when the write missed the configured timeout.
    /// - The store's error when the write failed.
    pub async fn log_sync(&self, mut event: AuditEvent) -> SentraResult<String> {
        let _guard = self.ingest.lock().await;
        let hash = self.shared.chain.compute_event_hash(&mut event);

        match timeout(
            self.shared.config.write_timeout,
            self.shared.store.store(&event),
        )
        .await
        {
            Ok(Ok(())) => {
                self.shared.chain.update_last_hash(&hash);
                self.shared.counters.logged.fetch_add(1, Ordering::Relaxed);
                self.shared.counters.stored.fetch_add(1, Ordering::Relaxed);
                self.shared.flush.write().unwrap().durable_head = hash.clone();
                Ok(hash)
            }
            Ok(Err(e)) => {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Err(_) => {
                self.shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                Err(SentraError::deadline_exceeded("synchronous audit write"))
            }
        }
    }

    /// Queries the durable store.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn query(&self, filter: &AuditQueryFilter) -> SentraResult<QueryPage> {
        self.shared.store.query(filter).await
    }

    /// Verifies the stored chain for a tenant over an optional time window.
    ///
    /// Every event's hash is recomputed and adjacent events must link. When
    /// the window does not start at genesis (`from` is set), the first
    /// event's back-link cannot be checked against anything inside the
    /// window and is exempt.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn verify_integrity(
        &self,
        tenant_id: &str,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> SentraResult<IntegrityReport> {
        let filter = AuditQueryFilter::new()
            .with_tenant(tenant_id)
            .with_window(from, to);
        let page = self.shared.store.query(&filter).await?;

        for (i, event) in page.events.iter().enumerate() {
            if hash_event(event) != event.hash {
                return Ok(IntegrityReport {
                    ok: false,
                    broken_index: i as i64,
                    events_checked: page.events.len(),
                });
            }
            let linked = match i {
                0 => from.is_some() || event.prev_hash.is_empty(),
                _ => event.prev_hash == page.events[i - 1].hash,
            };
            if !linked {
                return Ok(IntegrityReport {
                    ok: false,
                    broken_index: i as i64,
                    events_checked: page.events.len(),
                });
            }
        }

        Ok(IntegrityReport {
            ok: true,
            broken_index: -1,
            events_checked: page.events.len(),
        })
    }

    /// Aggregates statistics for a tenant over a window ending now.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn get_statistics(
        &self,
        tenant_id: &str,
        window: Duration,
    ) -> SentraResult<AuditStatistics> {
        self.shared.store.get_statistics(tenant_id, window).await
    }

    /// Current counters, timings, and state.
    #[must_use]
    pub fn metrics(&self) -> AuditMetrics {
        let flush = self.shared.flush.read().unwrap();
        AuditMetrics {
            events_logged: self.shared.counters.logged.load(Ordering::Relaxed),
            events_dropped: self.shared.counters.dropped.load(Ordering::Relaxed),
            events_failed: self.shared.counters.failed.load(Ordering::Relaxed),
            events_stored: self.shared.counters.stored.load(Ordering::Relaxed),
            buffer_used: self
                .shared
                .config
                .buffer_size
                .saturating_sub(self.tx.capacity()),
            last_flush_time: flush.last_flush_time,
            last_flush_duration: flush.last_flush_duration,
            durable_head: flush.durable_head.clone(),
            state: self.shared.state(),
        }
    }

    /// Stops accepting events, drains the buffer, and waits for the drain
    /// task to finish.
    pub async fn close(&self) {
        self.shared.set_state(PipelineState::Draining);
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Audit drain task failed");
        }
        self.shared.set_state(PipelineState::Stopped);
    }
}

// =============================================================================
// Drain task
// =============================================================================

async fn drain_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<AuditEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch: Vec<AuditEvent> = Vec::with_capacity(shared.config.batch_size);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_batch(&shared, &mut batch).await;
            }
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= shared.config.batch_size {
                        flush_batch(&shared, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => {
                shared.set_state(PipelineState::Draining);
                // No more writers from here on; drain what is buffered.
                rx.close();
                while let Some(event) = rx.recv().await {
                    batch.push(event);
                    if batch.len() >= shared.config.batch_size {
                        flush_batch(&shared, &mut batch).await;
                    }
                }
                break;
            }
        }
    }

    flush_batch(&shared, &mut batch).await;
    shared.set_state(PipelineState::Stopped);
    tracing::debug!("Audit drain task stopped");
}

/// Writes one batch under the configured deadline.
async fn flush_batch(shared: &Shared, batch: &mut Vec<AuditEvent>) {
    if batch.is_empty() {
        return;
    }
    let started = Instant::now();
    let count = batch.len();
    let processed = AtomicU64::new(0);

    let write = async {
        for event in batch.iter() {
            match shared.store.store(event).await {
                Ok(()) => {
                    shared.counters.stored.fetch_add(1, Ordering::Relaxed);
                    shared.flush.write().unwrap().durable_head = event.hash.clone();
                }
                Err(e) => {
                    shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = %event.id,
                        error = %e,
                        "Audit event write failed, skipping"
                    );
                }
            }
            processed.fetch_add(1, Ordering::Relaxed);
        }
    };

    if timeout(shared.config.write_timeout, write).await.is_err() {
        let remaining = count as u64 - processed.load(Ordering::Relaxed);
        shared.counters.failed.fetch_add(remaining, Ordering::Relaxed);
        tracing::error!(remaining, "Audit batch write deadline exceeded");
    }
    batch.clear();

    let mut flush = shared.flush.write().unwrap();
    flush.last_flush_time = Some(OffsetDateTime::now_utc());
    flush.last_flush_duration = Some(started.elapsed());
    drop(flush);
    tracing::trace!(events = count, "Audit batch flushed");
}

//! Bounded pub/sub notifier for policy-change events.
//!
//! The notifier keeps a handler registry and a bounded queue drained by a
//! single consumer task. Each handler invocation runs on its own task, so a
//! slow or panicking handler cannot stall the queue. `publish` never blocks:
//! when the queue is full the event is dropped and counted.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::types::{ChangeEvent, ChangeEventKind};

/// Default capacity of the internal event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Callback invoked with a delivered change event.
pub type ChangeHandler = Arc<dyn Fn(ChangeEvent) + Send + Sync + 'static>;

#[derive(Default)]
struct Subscribers {
    by_kind: HashMap<ChangeEventKind, Vec<ChangeHandler>>,
    all: Vec<ChangeHandler>,
}

impl Subscribers {
    /// Snapshot of the handlers interested in `kind`, kind-specific first.
    fn handlers_for(&self, kind: ChangeEventKind) -> Vec<ChangeHandler> {
        let mut handlers = self.by_kind.get(&kind).cloned().unwrap_or_default();
        handlers.extend(self.all.iter().cloned());
        handlers
    }
}

/// Pub/sub notifier for policy-change events.
pub struct ChangeNotifier {
    subscribers: Arc<RwLock<Subscribers>>,
    tx: mpsc::Sender<ChangeEvent>,
    rx: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    shutdown: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ChangeNotifier {
    /// Creates a notifier with the default queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a notifier with a custom queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            subscribers: Arc::new(RwLock::new(Subscribers::default())),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown,
            worker: tokio::sync::Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a handler for one event kind.
    pub fn subscribe(&self, kind: ChangeEventKind, handler: ChangeHandler) {
        let mut subs = self.subscribers.write().unwrap();
        subs.by_kind.entry(kind).or_default().push(handler);
    }

    /// Registers a handler for every event kind.
    pub fn subscribe_all(&self, handler: ChangeHandler) {
        let mut subs = self.subscribers.write().unwrap();
        subs.all.push(handler);
    }

    /// Removes every handler registered for `kind`.
    pub fn clear_subscribers(&self, kind: ChangeEventKind) {
        let mut subs = self.subscribers.write().unwrap();
        subs.by_kind.remove(&kind);
    }

    /// Number of registered handlers (kind-specific plus catch-all).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let subs = self.subscribers.read().unwrap();
        subs.by_kind.values().map(Vec::len).sum::<usize>() + subs.all.len()
    }

    /// Enqueues an event without blocking.
    ///
    /// Returns `false` when the queue is full or the consumer is gone; the
    /// event is dropped and counted.
    pub fn publish(&self, event: ChangeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                let event = match e {
                    mpsc::error::TrySendError::Full(ev)
                    | mpsc::error::TrySendError::Closed(ev) => ev,
                };
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %event.kind, "Change event dropped");
                false
            }
        }
    }

    /// Delivers an event to every interested handler before returning.
    ///
    /// A panicking handler is contained and logged; remaining handlers still
    /// run.
    pub fn publish_sync(&self, event: &ChangeEvent) {
        let handlers = {
            let subs = self.subscribers.read().unwrap();
            subs.handlers_for(event.kind)
        };
        for handler in handlers {
            let delivered = event.clone();
            if catch_unwind(AssertUnwindSafe(|| handler(delivered))).is_err() {
                tracing::error!(kind = %event.kind, "Change handler panicked");
            }
        }
    }

    /// Number of events dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Starts the consumer task. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let Some(mut rx) = self.rx.lock().unwrap().take() else {
            return;
        };
        let subscribers = Arc::clone(&self.subscribers);
        let mut shutdown_rx = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => dispatch(&subscribers, event),
                        None => break,
                    },
                    _ = shutdown_rx.changed() => {
                        // Drain whatever is queued, then exit.
                        rx.close();
                        while let Some(event) = rx.recv().await {
                            dispatch(&subscribers, event);
                        }
                        break;
                    }
                }
            }
            tracing::debug!("Change notifier consumer stopped");
        });

        *self.worker.lock().await = Some(handle);
    }

    /// Signals the consumer to drain the queue and stop, then waits for it.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Change notifier consumer failed");
        }
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscriber_count", &self.subscriber_count())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Fans an event out to its handlers, one task per handler.
fn dispatch(subscribers: &Arc<RwLock<Subscribers>>, event: ChangeEvent) {
    let handlers = {
        let subs = subscribers.read().unwrap();
        subs.handlers_for(event.kind)
    };
    for handler in handlers {
        let delivered = event.clone();
        tokio::spawn(async move {
            handler(delivered);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (ChangeHandler, mpsc::UnboundedReceiver<ChangeEventKind>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: ChangeHandler = Arc::new(move |event: ChangeEvent| {
            let _ = tx.send(event.kind);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_publish_delivers_to_kind_subscriber() {
        let notifier = ChangeNotifier::new();
        let (handler, mut rx) = collector();
        notifier.subscribe(ChangeEventKind::PolicyUpdated, handler);
        notifier.start().await;

        assert!(notifier.publish(ChangeEvent::updated(1, vec![], "c")));

        let kind = rx.recv().await.unwrap();
        assert_eq!(kind, ChangeEventKind::PolicyUpdated);
        notifier.stop().await;
    }

    #[tokio::test]
    async fn test_kind_filtering() {
        let notifier = ChangeNotifier::new();
        let (handler, mut rx) = collector();
        notifier.subscribe(ChangeEventKind::PolicyRolledBack, handler);
        let (all_handler, mut all_rx) = collector();
        notifier.subscribe_all(all_handler);
        notifier.start().await;

        notifier.publish(ChangeEvent::updated(1, vec![], "c"));

        // Catch-all sees it; the rolled-back subscriber does not.
        assert_eq!(all_rx.recv().await.unwrap(), ChangeEventKind::PolicyUpdated);
        assert!(rx.try_recv().is_err());
        notifier.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queue() {
        let notifier = ChangeNotifier::new();
        let (handler, mut rx) = collector();
        notifier.subscribe_all(handler);
        notifier.start().await;

        for i in 0..5 {
            assert!(notifier.publish(ChangeEvent::version_created(i, "c")));
        }
        notifier.stop().await;

        for _ in 0..5 {
            assert_eq!(rx.recv().await.unwrap(), ChangeEventKind::VersionCreated);
        }
    }

    #[tokio::test]
    async fn test_publish_drops_when_full() {
        let notifier = ChangeNotifier::with_capacity(1);
        // No consumer started; the queue fills immediately.
        assert!(notifier.publish(ChangeEvent::updated(1, vec![], "a")));
        assert!(!notifier.publish(ChangeEvent::updated(2, vec![], "b")));
        assert_eq!(notifier.dropped(), 1);
    }

    #[tokio::test]
    async fn test_publish_sync_survives_panicking_handler() {
        let notifier = ChangeNotifier::new();
        notifier.subscribe_all(Arc::new(|_| panic!("bad handler")));
        let (handler, mut rx) = collector();
        notifier.subscribe_all(handler);

        notifier.publish_sync(&ChangeEvent::updated(1, vec![], "c"));

        assert_eq!(rx.recv().await.unwrap(), ChangeEventKind::PolicyUpdated);
    }

    #[tokio::test]
    async fn test_clear_subscribers() {
        let notifier = ChangeNotifier::new();
        let (handler, mut rx) = collector();
        notifier.subscribe(ChangeEventKind::PolicyUpdated, handler);
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.clear_subscribers(ChangeEventKind::PolicyUpdated);
        assert_eq!(notifier.subscriber_count(), 0);

        notifier.publish_sync(&ChangeEvent::updated(1, vec![], "c"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_sync_order_preserved() {
        let notifier = ChangeNotifier::new();
        let (handler, mut rx) = collector();
        notifier.subscribe_all(handler);

        notifier.publish_sync(&ChangeEvent::updated(1, vec![], "a"));
        notifier.publish_sync(&ChangeEvent::rolled_back(1, vec![]));

        assert_eq!(rx.recv().await.unwrap(), ChangeEventKind::PolicyUpdated);
        assert_eq!(rx.recv().await.unwrap(), ChangeEventKind::PolicyRolledBack);
    }
}

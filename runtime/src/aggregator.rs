//! Running counters derived from the system channel.
//!
//! A [`MetricsAggregator`] subscribes to [`EventType::System`] when attached
//! and unsubscribes when dropped. Its counters start at zero and only grow, so
//! a page that attaches its own aggregator on mount sees counts for its own
//! lifetime, while one held by the composition root counts for the process.

use crate::metrics::SystemEventMetrics;
use biblioteca_sync_core::event::{Event, EventType, Severity};
use biblioteca_sync_core::event_bus::EventBus;
use biblioteca_sync_core::subscription::ScopedSubscription;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

/// Counter values at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Info-severity system events seen
    pub processed: u64,
    /// Error-severity system events seen
    pub errors: u64,
}

impl MetricsSnapshot {
    /// Total system events seen.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.processed.saturating_add(self.errors)
    }
}

type SnapshotObserver = Arc<dyn Fn(MetricsSnapshot) + Send + Sync>;

/// Snapshots waiting for observers, in increment order.
#[derive(Default)]
struct Delivery {
    pending: VecDeque<MetricsSnapshot>,
    draining: bool,
}

struct State {
    snapshot: watch::Sender<MetricsSnapshot>,
    observers: Mutex<Vec<(u64, SnapshotObserver)>>,
    next_observer: AtomicU64,
    delivery: Mutex<Delivery>,
}

impl State {
    fn observers(&self) -> MutexGuard<'_, Vec<(u64, SnapshotObserver)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: &Event) {
        let severity = event.system_event().map_or_else(
            || {
                tracing::debug!("System event without payload counted as info");
                Severity::Info
            },
            |system| system.severity,
        );

        // Increment and enqueue under one lock so queue order is increment order.
        let start_draining = {
            let mut delivery = self.delivery();
            let mut updated = MetricsSnapshot::default();
            self.snapshot.send_modify(|snapshot| {
                match severity {
                    Severity::Info => snapshot.processed = snapshot.processed.saturating_add(1),
                    Severity::Error => snapshot.errors = snapshot.errors.saturating_add(1),
                }
                updated = *snapshot;
            });
            delivery.pending.push_back(updated);
            !std::mem::replace(&mut delivery.draining, true)
        };

        match severity {
            Severity::Info => SystemEventMetrics::record_processed(),
            Severity::Error => SystemEventMetrics::record_error(),
        }

        if start_draining {
            self.drain();
        }
    }

    /// Deliver queued snapshots until the queue is empty.
    ///
    /// Only one caller drains at a time. A record made meanwhile, from another
    /// thread or from inside an observer, is delivered by the active drainer
    /// after everything queued before it.
    fn drain(&self) {
        loop {
            let next = {
                let mut delivery = self.delivery();
                let Some(next) = delivery.pending.pop_front() else {
                    delivery.draining = false;
                    return;
                };
                next
            };

            let observers: Vec<SnapshotObserver> = self
                .observers()
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            for observer in observers {
                if catch_unwind(AssertUnwindSafe(|| observer(next))).is_err() {
                    tracing::warn!("Metrics observer panicked");
                }
            }
        }
    }
}

/// Maintains `processed`/`errors` counters for the system channel.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::event_bus::EventBus;
/// use biblioteca_sync_core::publisher::Publisher;
/// use biblioteca_sync_runtime::aggregator::MetricsAggregator;
///
/// let bus = EventBus::new();
/// let aggregator = MetricsAggregator::attach(&bus);
///
/// let publisher = Publisher::new(&bus);
/// publisher.info("Book 1 created");
/// publisher.error("Failed to delete book");
///
/// let snapshot = aggregator.snapshot();
/// assert_eq!((snapshot.processed, snapshot.errors), (1, 1));
/// ```
pub struct MetricsAggregator {
    state: Arc<State>,
    subscription: ScopedSubscription,
}

impl MetricsAggregator {
    /// Start counting system events on `bus`.
    #[must_use]
    pub fn attach(bus: &EventBus) -> Self {
        let (snapshot, _) = watch::channel(MetricsSnapshot::default());
        let state = Arc::new(State {
            snapshot,
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            delivery: Mutex::new(Delivery::default()),
        });

        let weak = Arc::downgrade(&state);
        let subscription = bus
            .on(EventType::System, move |event| {
                if let Some(state) = weak.upgrade() {
                    state.record(event);
                }
            })
            .scoped();

        tracing::debug!("Metrics aggregator attached");
        Self { state, subscription }
    }

    /// Current counters (`useMetricsSnapshot`).
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.state.snapshot.borrow()
    }

    /// Receiver updated on every increment.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MetricsSnapshot> {
        self.state.snapshot.subscribe()
    }

    /// Run `observer` with the new counters after every increment, until the
    /// returned guard is dropped.
    ///
    /// Observers see snapshots in increment order. An increment made on the
    /// thread already delivering, including one made from inside an observer,
    /// is delivered once the current observers return.
    pub fn observe<F>(&self, observer: F) -> SnapshotObserverGuard
    where
        F: Fn(MetricsSnapshot) + Send + Sync + 'static,
    {
        let id = self.state.next_observer.fetch_add(1, Ordering::Relaxed);
        self.state.observers().push((id, Arc::new(observer)));
        SnapshotObserverGuard {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Whether the aggregator is still subscribed to the bus.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.subscription.is_held()
    }

    /// Stop counting. Later system events leave the counters unchanged.
    pub fn detach(&mut self) {
        self.subscription.release();
    }
}

impl fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("snapshot", &self.snapshot())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Removes a snapshot observer when dropped.
#[must_use = "dropping the guard removes the observer immediately"]
pub struct SnapshotObserverGuard {
    id: u64,
    state: Weak<State>,
}

impl Drop for SnapshotObserverGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.observers().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for SnapshotObserverGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotObserverGuard").field("id", &self.id).finish()
    }
}

//! In-memory event bus for keeping independent views consistent.
//!
//! This module provides [`EventBus`], a publish/subscribe registry keyed by
//! [`EventType`]. Producers call [`EventBus::emit`]; every subscriber
//! registered for that type at the moment dispatch begins is invoked once,
//! synchronously, before `emit` returns.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   create(book)   ┌──────────────┐
//! │  Books view  │ ───────────────► │ Reactive API │
//! └──────────────┘                  └──────┬───────┘
//!                                          │ emit(BOOK_CREATED)
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │   EventBus   │
//!                                   └──────┬───────┘
//!                               ┌──────────┴──────────┐
//!                               ▼                     ▼
//!                        ┌────────────┐        ┌────────────┐
//!                        │ Loans view │        │  Metrics   │
//!                        │  reloads   │        │ aggregator │
//!                        └────────────┘        └────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Snapshot-then-dispatch**: subscribers added or removed during a
//!   dispatch only affect later emissions
//! - **Insertion order**: callbacks of one type run in registration order
//! - **Failure isolation**: a failing or panicking callback never prevents
//!   delivery to the rest of the snapshot, and never reaches the emitter
//! - **No buffering**: an event with no subscribers is dropped
//!
//! # Thread Safety
//!
//! Registry mutation happens under a mutex; callbacks run with the lock
//! released, so they may freely subscribe, unsubscribe or emit.

use crate::environment::{Clock, SystemClock};
use crate::event::{Event, EventType, SystemEvent};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Failure raised by a subscriber callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    /// The callback returned an error
    #[error("Subscriber failed: {0}")]
    Failed(String),

    /// The callback panicked
    #[error("Subscriber panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    /// Convenience constructor for [`SubscriberError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A subscriber callback.
///
/// Shared so that a dispatch snapshot can hold it while the registry changes.
pub type Callback = Arc<dyn Fn(&Event) -> Result<(), SubscriberError> + Send + Sync>;

/// Identifier of one registration on one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw value, unique per bus.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registration {
    id: SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_type: HashMap<EventType, Vec<Registration>>,
}

impl Registry {
    fn insert(&mut self, event_type: EventType, callback: Callback) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_type
            .entry(event_type)
            .or_default()
            .push(Registration { id, callback });
        id
    }

    fn remove(&mut self, event_type: EventType, id: SubscriptionId) -> bool {
        let Some(registrations) = self.by_type.get_mut(&event_type) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            self.by_type.remove(&event_type);
        }
        removed
    }

    fn snapshot(&self, event_type: EventType) -> Vec<(SubscriptionId, Callback)> {
        self.by_type
            .get(&event_type)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|r| (r.id, Arc::clone(&r.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct BusInner {
    registry: Mutex<Registry>,
    clock: Arc<dyn Clock>,
    emitted: AtomicU64,
    subscriber_failures: AtomicU64,
}

impl BusInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Callbacks never run under this lock, so a poisoned guard still
        // holds a consistent registry.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, event_type: EventType, id: SubscriptionId) -> bool {
        let removed = self.registry().remove(event_type, id);
        if removed {
            tracing::debug!(%event_type, subscription = %id, "Unsubscribed");
        }
        removed
    }
}

/// Publish/subscribe registry keyed by [`EventType`].
///
/// Cloning is cheap and yields a handle to the same registry. Construct one
/// bus per isolated context (each test gets its own); the process-wide
/// instance lives at the composition root.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::entity::{EntityId, EntityKind};
/// use biblioteca_sync_core::event::{Event, EventType};
/// use biblioteca_sync_core::event_bus::EventBus;
///
/// let bus = EventBus::new();
/// let subscription = bus.on(EventType::created(EntityKind::Loan), |event| {
///     println!("loan {:?} created", event.entity_id());
/// });
///
/// let delivered = bus.emit(Event::domain(
///     EventType::created(EntityKind::Loan),
///     EntityId::new(1),
///     bus.now(),
/// ));
/// assert_eq!(delivered, 1);
///
/// subscription.unsubscribe();
/// subscription.unsubscribe(); // idempotent
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty bus with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: Mutex::new(Registry::default()),
                clock,
                emitted: AtomicU64::new(0),
                subscriber_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Current time according to the bus clock, for stamping events.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Register a fallible callback for `event_type`.
    ///
    /// The callback runs once per matching emission that begins after this
    /// call returns and before the subscription is removed.
    pub fn subscribe<F>(&self, event_type: EventType, callback: F) -> Subscription
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribe_callback(event_type, Arc::new(callback))
    }

    /// Register an infallible callback for `event_type`.
    pub fn on<F>(&self, event_type: EventType, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(event_type, move |event| {
            callback(event);
            Ok(())
        })
    }

    /// Register an already shared callback.
    ///
    /// Used by [`SubscriptionBinding`](crate::subscription::SubscriptionBinding),
    /// which compares callback identity across re-binds.
    pub fn subscribe_callback(&self, event_type: EventType, callback: Callback) -> Subscription {
        let id = self.inner.registry().insert(event_type, callback);
        tracing::debug!(%event_type, subscription = %id, "Subscribed");

        Subscription {
            id,
            event_type,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration.
    ///
    /// Idempotent: returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.unsubscribe(subscription.event_type, subscription.id)
    }

    /// Dispatch `event` to every callback registered for its type.
    ///
    /// The subscriber set is captured before the first callback runs.
    /// Failures are isolated per callback: each one is logged and, for
    /// domain events, re-reported as an error on the system channel once the
    /// snapshot has been drained. Failures of system-channel subscribers are
    /// only logged so that reporting cannot recurse.
    ///
    /// Returns the number of callbacks invoked; `0` means the event was
    /// dropped.
    pub fn emit(&self, event: Event) -> usize {
        let event_type = event.event_type();
        let snapshot = self.inner.registry().snapshot(event_type);
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        if snapshot.is_empty() {
            tracing::trace!(%event_type, "No subscribers, event dropped");
            return 0;
        }

        tracing::debug!(%event_type, subscribers = snapshot.len(), "Dispatching event");

        let mut failures = Vec::new();
        for (id, callback) in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(panic) => SubscriberError::Panicked(panic_message(panic.as_ref())),
            };
            tracing::warn!(%event_type, subscription = %id, error = %failure, "Subscriber failed");
            self.inner.subscriber_failures.fetch_add(1, Ordering::Relaxed);
            failures.push((*id, failure));
        }

        if !event_type.is_system() {
            for (id, failure) in failures {
                let report = SystemEvent::error(failure.to_string())
                    .with_metadata("event_type", event_type.to_string())
                    .with_metadata("subscription", id.get());
                self.emit(Event::system(report, self.now()));
            }
        }

        snapshot.len()
    }

    /// Number of live registrations for `event_type`.
    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.inner
            .registry()
            .by_type
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Number of live registrations across all types.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.inner.registry().by_type.values().map(Vec::len).sum()
    }

    /// Total number of `emit` calls on this bus.
    #[must_use]
    pub fn emitted_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }

    /// Total number of callback failures caught by this bus.
    #[must_use]
    pub fn subscriber_failure_count(&self) -> u64 {
        self.inner.subscriber_failures.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.total_subscribers())
            .field("emitted", &self.emitted_count())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to one registration.
///
/// The bus keeps the callback; this handle only knows how to remove it and
/// does not keep the bus alive. Dropping it leaves the registration in place;
/// use [`Subscription::scoped`] to tie removal to a scope.
#[must_use = "dropping a Subscription leaves the callback registered; call unsubscribe() or scoped()"]
pub struct Subscription {
    id: SubscriptionId,
    event_type: EventType,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Registration id.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Event type this subscription listens to.
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Whether the registration is still present on a live bus.
    pub fn is_active(&self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let registry = bus.registry();
        registry
            .by_type
            .get(&self.event_type)
            .is_some_and(|regs| regs.iter().any(|r| r.id == self.id))
    }

    /// Remove the registration.
    ///
    /// Idempotent, and a no-op once the bus itself is gone. Returns whether
    /// this call removed anything.
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.unsubscribe(self.event_type, self.id))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityId, EntityKind};
    use std::sync::atomic::AtomicUsize;

    fn book_created(bus: &EventBus, id: i64) -> Event {
        Event::domain(EventType::created(EntityKind::Book), EntityId::new(id), bus.now())
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &Event| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_reaches_only_matching_type() {
        let bus = EventBus::new();
        let (books, on_book) = counter();
        let (loans, on_loan) = counter();
        let _a = bus.on(EventType::created(EntityKind::Book), on_book);
        let _b = bus.on(EventType::created(EntityKind::Loan), on_loan);

        assert_eq!(bus.emit(book_created(&bus, 1)), 1);

        assert_eq!(books.load(Ordering::SeqCst), 1);
        assert_eq!(loans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callbacks_run_in_insertion_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for n in 0..4 {
            let order = Arc::clone(&order);
            subs.push(bus.on(EventType::created(EntityKind::Book), move |_| {
                order.lock().unwrap_or_else(PoisonError::into_inner).push(n);
            }));
        }

        bus.emit(book_created(&bus, 1));

        assert_eq!(*order.lock().unwrap_or_else(PoisonError::into_inner), vec![0, 1, 2, 3]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        let sub = bus.on(EventType::created(EntityKind::Book), cb);

        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!bus.unsubscribe(&sub));
        assert!(!sub.is_active());

        assert_eq!(bus.emit(book_created(&bus, 1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_after_bus_dropped_is_noop() {
        let bus = EventBus::new();
        let sub = bus.on(EventType::System, |_| {});
        drop(bus);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn events_without_subscribers_are_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(book_created(&bus, 1)), 0);

        let (count, cb) = counter();
        let _late = bus.on(EventType::created(EntityKind::Book), cb);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.emitted_count(), 1);
    }

    #[test]
    fn subscribe_during_dispatch_takes_effect_next_emit() {
        let bus = EventBus::new();
        let (late_count, late_cb) = counter();
        let late_cb = Arc::new(late_cb);
        let added = Arc::new(Mutex::new(Vec::new()));

        let bus_for_cb = bus.clone();
        let added_for_cb = Arc::clone(&added);
        let _adder = bus.on(EventType::created(EntityKind::Book), move |_| {
            let cb = Arc::clone(&late_cb);
            let sub = bus_for_cb.on(EventType::created(EntityKind::Book), move |e| (*cb)(e));
            added_for_cb.lock().unwrap_or_else(PoisonError::into_inner).push(sub);
        });

        assert_eq!(bus.emit(book_created(&bus, 1)), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        assert_eq!(bus.emit(book_created(&bus, 2)), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_during_dispatch_does_not_affect_in_flight_emit() {
        let bus = EventBus::new();
        let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&victim_slot);
        let _remover = bus.on(EventType::created(EntityKind::Book), move |_| {
            if let Some(sub) = slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                sub.unsubscribe();
            }
        });
        let (victim_count, victim_cb) = counter();
        let victim = bus.on(EventType::created(EntityKind::Book), victim_cb);
        *victim_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(victim);

        assert_eq!(bus.emit(book_created(&bus, 1)), 2);
        assert_eq!(victim_count.load(Ordering::SeqCst), 1);

        assert_eq!(bus.emit(book_created(&bus, 2)), 1);
        assert_eq!(victim_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let _failing = bus.subscribe(EventType::created(EntityKind::Book), |_| {
            Err(SubscriberError::failed("render crashed"))
        });
        let (count, cb) = counter();
        let _ok = bus.on(EventType::created(EntityKind::Book), cb);

        assert_eq!(bus.emit(book_created(&bus, 1)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_failure_count(), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        #[allow(clippy::panic)]
        let _panics = bus.on(EventType::created(EntityKind::Book), |_| panic!("boom"));
        let (count, cb) = counter();
        let _ok = bus.on(EventType::created(EntityKind::Book), cb);

        assert_eq!(bus.emit(book_created(&bus, 1)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_failure_count(), 1);
    }

    #[test]
    fn domain_subscriber_failure_is_reported_on_system_channel() {
        let bus = EventBus::new();
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let _system = bus.on(EventType::System, move |event| {
            if let Some(system) = event.system_event() {
                sink.lock().unwrap_or_else(PoisonError::into_inner).push(system.clone());
            }
        });
        let _failing = bus.subscribe(EventType::deleted(EntityKind::User), |_| {
            Err(SubscriberError::failed("stale row"))
        });

        bus.emit(Event::domain(EventType::deleted(EntityKind::User), EntityId::new(4), bus.now()));

        let reports = reports.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, crate::event::Severity::Error);
        assert_eq!(reports[0].message, "Subscriber failed: stale row");
        assert_eq!(
            reports[0].metadata_value("event_type"),
            Some(&serde_json::json!("USER_DELETED"))
        );
    }

    #[test]
    fn system_subscriber_failure_is_not_re_reported() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        let _failing = bus.subscribe(EventType::System, |_| Err(SubscriberError::failed("nope")));
        let _observer = bus.on(EventType::System, cb);

        bus.emit(Event::system(SystemEvent::info("hello"), bus.now()));

        // Only the original event; no recursive error report.
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_failure_count(), 1);
    }

    #[test]
    fn clones_share_one_registry() {
        let bus = EventBus::new();
        let other = bus.clone();
        let _sub = other.on(EventType::System, |_| {});
        assert_eq!(bus.subscriber_count(EventType::System), 1);
        assert_eq!(bus.total_subscribers(), 1);
    }

    #[test]
    fn separate_buses_are_isolated() {
        let a = EventBus::new();
        let b = EventBus::new();
        let (count, cb) = counter();
        let _sub = a.on(EventType::created(EntityKind::Book), cb);

        assert_eq!(b.emit(book_created(&b, 1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

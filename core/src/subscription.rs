//! Subscriptions bound to a consumer's active lifetime.
//!
//! A view subscribes when it becomes active and must unsubscribe when it goes
//! away, on every exit path. These types express that as scoped acquisition:
//! the registration is released when the owning value is dropped, whether
//! the scope ends normally, returns early through `?`, or unwinds.
//!
//! - [`ScopedSubscription`]: one registration, released on drop
//! - [`SubscriptionScope`]: several registrations owned by one view
//! - [`SubscriptionBinding`]: one slot that re-registers when the event type
//!   or the callback identity changes, releasing the previous registration
//!   first

use crate::entity::EntityKind;
use crate::event::{Event, EventType};
use crate::event_bus::{Callback, EventBus, SubscriberError, Subscription, SubscriptionId};
use std::sync::Arc;

impl Subscription {
    /// Tie this registration to the returned guard's lifetime.
    pub fn scoped(self) -> ScopedSubscription {
        ScopedSubscription {
            subscription: Some(self),
        }
    }
}

/// A registration that is removed when this guard is dropped.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::entity::{EntityId, EntityKind};
/// use biblioteca_sync_core::event::{Event, EventType};
/// use biblioteca_sync_core::event_bus::EventBus;
///
/// let bus = EventBus::new();
/// {
///     let _guard = bus.on(EventType::deleted(EntityKind::User), |_| {}).scoped();
///     assert_eq!(bus.subscriber_count(EventType::deleted(EntityKind::User)), 1);
/// }
/// assert_eq!(bus.subscriber_count(EventType::deleted(EntityKind::User)), 0);
/// ```
#[must_use = "dropping the guard immediately unsubscribes"]
#[derive(Debug)]
pub struct ScopedSubscription {
    subscription: Option<Subscription>,
}

impl ScopedSubscription {
    /// Registration id, if not yet released.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.subscription.as_ref().map(Subscription::id)
    }

    /// Event type, if not yet released.
    pub fn event_type(&self) -> Option<EventType> {
        self.subscription.as_ref().map(Subscription::event_type)
    }

    /// Release now instead of at scope exit. Idempotent.
    pub fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Whether the guard still holds a registration.
    pub const fn is_held(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// All registrations owned by one view.
///
/// Created on mount; dropping it on unmount releases everything it holds.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::entity::EntityKind;
/// use biblioteca_sync_core::event_bus::EventBus;
/// use biblioteca_sync_core::subscription::SubscriptionScope;
///
/// let bus = EventBus::new();
/// let mut loans_view = SubscriptionScope::new(&bus);
/// loans_view.on_changes(EntityKind::Loan, |_| { /* reload loans */ });
/// loans_view.on_changes(EntityKind::Book, |_| { /* reload available books */ });
/// assert_eq!(bus.total_subscribers(), 6);
///
/// drop(loans_view);
/// assert_eq!(bus.total_subscribers(), 0);
/// ```
#[derive(Debug)]
pub struct SubscriptionScope {
    bus: EventBus,
    guards: Vec<ScopedSubscription>,
}

impl SubscriptionScope {
    /// Open an empty scope on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            guards: Vec::new(),
        }
    }

    /// Add a fallible callback to this scope.
    pub fn subscribe<F>(&mut self, event_type: EventType, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.hold(self.bus.subscribe(event_type, callback))
    }

    /// Add an infallible callback to this scope.
    pub fn on<F>(&mut self, event_type: EventType, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.hold(self.bus.on(event_type, callback))
    }

    /// Subscribe one callback to created, updated and deleted events of `kind`.
    pub fn on_changes<F>(&mut self, kind: EntityKind, callback: F) -> [SubscriptionId; 3]
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        EventType::changes_of(kind).map(|event_type| {
            let callback = Arc::clone(&callback);
            self.on(event_type, move |event| callback(event))
        })
    }

    /// Number of registrations held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether the scope holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Release everything now; the scope stays usable.
    pub fn clear(&mut self) {
        self.guards.clear();
    }

    fn hold(&mut self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id();
        self.guards.push(subscription.scoped());
        id
    }
}

struct Bound {
    event_type: EventType,
    callback: Callback,
    guard: ScopedSubscription,
}

/// A single subscription slot that follows changing inputs.
///
/// Each call to [`bind`](Self::bind) compares the requested event type and
/// callback identity (pointer equality of the shared callback) with the
/// current registration. When either differs the old registration is
/// removed before the new one is added, so at most one is ever live.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::entity::EntityKind;
/// use biblioteca_sync_core::event::{Event, EventType};
/// use biblioteca_sync_core::event_bus::{Callback, EventBus};
/// use biblioteca_sync_core::subscription::SubscriptionBinding;
/// use std::sync::Arc;
///
/// let bus = EventBus::new();
/// let reload: Callback = Arc::new(|_: &Event| Ok(()));
/// let mut binding = SubscriptionBinding::new(&bus);
///
/// assert!(binding.bind(EventType::created(EntityKind::Book), Arc::clone(&reload)));
/// assert!(!binding.bind(EventType::created(EntityKind::Book), Arc::clone(&reload)));
/// assert!(binding.bind(EventType::created(EntityKind::Author), reload));
/// assert_eq!(bus.total_subscribers(), 1);
/// ```
pub struct SubscriptionBinding {
    bus: EventBus,
    current: Option<Bound>,
}

impl SubscriptionBinding {
    /// An inactive binding on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            current: None,
        }
    }

    /// Ensure exactly one registration of `callback` for `event_type`.
    ///
    /// Returns `true` if a (re-)registration happened, `false` if the
    /// existing one already matched.
    pub fn bind(&mut self, event_type: EventType, callback: Callback) -> bool {
        if let Some(bound) = &self.current {
            if bound.event_type == event_type && same_callback(&bound.callback, &callback) {
                return false;
            }
        }

        // Release the previous registration before adding the next one.
        self.unbind();

        let guard = self
            .bus
            .subscribe_callback(event_type, Arc::clone(&callback))
            .scoped();
        tracing::debug!(%event_type, "Subscription bound");
        self.current = Some(Bound {
            event_type,
            callback,
            guard,
        });
        true
    }

    /// Release the current registration, if any.
    pub fn unbind(&mut self) {
        if let Some(mut bound) = self.current.take() {
            bound.guard.release();
        }
    }

    /// Whether a registration is live.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.current.is_some()
    }

    /// Event type of the live registration.
    #[must_use]
    pub fn event_type(&self) -> Option<EventType> {
        self.current.as_ref().map(|bound| bound.event_type)
    }

    /// Id of the live registration.
    #[must_use]
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.current.as_ref().and_then(|bound| bound.guard.id())
    }
}

impl std::fmt::Debug for SubscriptionBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionBinding")
            .field("event_type", &self.event_type())
            .field("subscription", &self.subscription_id())
            .finish_non_exhaustive()
    }
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn emit_created(bus: &EventBus, kind: EntityKind) -> usize {
        bus.emit(Event::domain(EventType::created(kind), EntityId::new(1), bus.now()))
    }

    #[test]
    fn scoped_guard_releases_on_drop() {
        let bus = EventBus::new();
        let guard = bus.on(EventType::created(EntityKind::Book), |_| {}).scoped();
        assert!(guard.is_held());
        assert_eq!(emit_created(&bus, EntityKind::Book), 1);

        drop(guard);
        assert_eq!(emit_created(&bus, EntityKind::Book), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let bus = EventBus::new();
        let mut guard = bus.on(EventType::System, |_| {}).scoped();
        guard.release();
        guard.release();
        assert!(!guard.is_held());
        assert_eq!(guard.id(), None);
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn early_return_releases_registration() {
        fn mount(bus: &EventBus, fail: bool) -> Result<ScopedSubscription, &'static str> {
            let guard = bus.on(EventType::created(EntityKind::Loan), |_| {}).scoped();
            if fail {
                return Err("setup failed");
            }
            Ok(guard)
        }

        let bus = EventBus::new();
        assert!(mount(&bus, true).is_err());
        assert_eq!(bus.total_subscribers(), 0);

        let guard = mount(&bus, false);
        assert!(guard.is_ok());
        assert_eq!(bus.total_subscribers(), 1);
    }

    #[test]
    fn unwinding_releases_registration() {
        let bus = EventBus::new();
        let bus_in_scope = bus.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = bus_in_scope.on(EventType::System, |_| {}).scoped();
            #[allow(clippy::panic)]
            {
                panic!("render failed");
            }
        }));
        assert!(result.is_err());
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn scope_groups_and_releases_all() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut scope = SubscriptionScope::new(&bus);
        let counter = Arc::clone(&hits);
        scope.on_changes(EntityKind::Book, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scope.len(), 3);

        bus.emit(Event::domain(EventType::updated(EntityKind::Book), EntityId::new(1), bus.now()));
        bus.emit(Event::domain(EventType::deleted(EntityKind::Book), EntityId::new(1), bus.now()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        scope.clear();
        assert!(scope.is_empty());
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn binding_reuses_matching_registration() {
        let bus = EventBus::new();
        let callback: Callback = Arc::new(|_: &Event| Ok(()));
        let mut binding = SubscriptionBinding::new(&bus);

        assert!(binding.bind(EventType::created(EntityKind::Book), Arc::clone(&callback)));
        let first = binding.subscription_id();
        assert!(!binding.bind(EventType::created(EntityKind::Book), Arc::clone(&callback)));
        assert_eq!(binding.subscription_id(), first);
        assert_eq!(bus.total_subscribers(), 1);
    }

    #[test]
    fn binding_rebinds_on_new_callback_identity() {
        let bus = EventBus::new();
        let old_hits = Arc::new(AtomicUsize::new(0));
        let new_hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&old_hits);
        let old: Callback = Arc::new(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let counter = Arc::clone(&new_hits);
        let new: Callback = Arc::new(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut binding = SubscriptionBinding::new(&bus);
        binding.bind(EventType::created(EntityKind::Book), old);
        assert!(binding.bind(EventType::created(EntityKind::Book), new));
        assert_eq!(bus.total_subscribers(), 1);

        emit_created(&bus, EntityKind::Book);
        assert_eq!(old_hits.load(Ordering::SeqCst), 0);
        assert_eq!(new_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn binding_rebinds_on_event_type_change_and_releases_on_drop() {
        let bus = EventBus::new();
        let callback: Callback = Arc::new(|_: &Event| Ok(()));
        let mut binding = SubscriptionBinding::new(&bus);

        binding.bind(EventType::created(EntityKind::Book), Arc::clone(&callback));
        binding.bind(EventType::created(EntityKind::Author), callback);

        assert_eq!(bus.subscriber_count(EventType::created(EntityKind::Book)), 0);
        assert_eq!(bus.subscriber_count(EventType::created(EntityKind::Author)), 1);
        assert_eq!(binding.event_type(), Some(EventType::created(EntityKind::Author)));

        drop(binding);
        assert_eq!(bus.total_subscribers(), 0);
    }

    #[test]
    fn unbind_then_bind_registers_again() {
        let bus = EventBus::new();
        let callback: Callback = Arc::new(|_: &Event| Ok(()));
        let mut binding = SubscriptionBinding::new(&bus);

        binding.bind(EventType::System, Arc::clone(&callback));
        binding.unbind();
        assert!(!binding.is_bound());
        assert!(binding.bind(EventType::System, callback));
        assert_eq!(bus.subscriber_count(EventType::System), 1);
    }
}

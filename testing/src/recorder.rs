//! Capture of events delivered by a bus.

use biblioteca_sync_core::entity::EntityKind;
use biblioteca_sync_core::event::{Event, EventType, SystemEvent};
use biblioteca_sync_core::event_bus::EventBus;
use biblioteca_sync_core::subscription::SubscriptionScope;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Records every event of the chosen types, in delivery order.
///
/// Subscriptions are released when the recorder is dropped.
#[derive(Debug)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
    scope: SubscriptionScope,
}

impl EventRecorder {
    /// Record `event_types` on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus, event_types: impl IntoIterator<Item = EventType>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut scope = SubscriptionScope::new(bus);

        for event_type in event_types {
            let sink = Arc::clone(&events);
            scope.on(event_type, move |event| {
                lock(&sink).push(event.clone());
            });
        }

        Self { events, scope }
    }

    /// Record the system channel and every domain event type.
    #[must_use]
    pub fn all(bus: &EventBus) -> Self {
        let domain = EntityKind::ALL.into_iter().flat_map(EventType::changes_of);
        Self::new(bus, std::iter::once(EventType::System).chain(domain))
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Types of recorded events, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        lock(&self.events).iter().map(Event::event_type).collect()
    }

    /// Domain event types only, in order.
    #[must_use]
    pub fn domain_event_types(&self) -> Vec<EventType> {
        self.event_types()
            .into_iter()
            .filter(|event_type| !event_type.is_system())
            .collect()
    }

    /// Payloads of recorded system events, in order.
    #[must_use]
    pub fn system_events(&self) -> Vec<SystemEvent> {
        lock(&self.events)
            .iter()
            .filter_map(|event| event.system_event().cloned())
            .collect()
    }

    /// Number of recorded events of `event_type`.
    #[must_use]
    pub fn count(&self, event_type: EventType) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    /// Forget what was recorded; keep recording.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Number of live subscriptions held.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.scope.len()
    }
}

fn lock(events: &Mutex<Vec<Event>>) -> MutexGuard<'_, Vec<Event>> {
    events.lock().unwrap_or_else(PoisonError::into_inner)
}

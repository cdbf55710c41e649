//! One-call emission of system events.
//!
//! Callers describe what happened (message, severity, optional metadata);
//! [`Publisher`] builds the [`SystemEvent`], stamps it and emits it on the
//! reserved channel. It holds no state besides the bus handle, so it can be
//! cloned freely and used before any subscriber exists. Events published
//! with nobody listening are dropped, not queued.

use crate::entity::{ChangeKind, EntityId, EntityKind};
use crate::event::{Event, EventType, Metadata, Severity, SystemEvent};
use crate::event_bus::EventBus;

/// Facade over [`EventBus`] for system and domain emissions.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_core::event::Severity;
/// use biblioteca_sync_core::event_bus::EventBus;
/// use biblioteca_sync_core::publisher::Publisher;
///
/// let bus = EventBus::new();
/// let publisher = Publisher::new(&bus);
///
/// // Nobody listens yet: the event is simply dropped.
/// publisher.publish_system_event("Catalog opened", Severity::Info, None);
/// ```
#[derive(Debug, Clone)]
pub struct Publisher {
    bus: EventBus,
}

impl Publisher {
    /// Publisher emitting on `bus`.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self { bus: bus.clone() }
    }

    /// The bus this publisher emits on.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Build and emit a system event.
    pub fn publish_system_event(
        &self,
        message: impl Into<String>,
        severity: Severity,
        metadata: Option<Metadata>,
    ) {
        let mut system = SystemEvent::new(message, severity);
        system.metadata = metadata;
        self.publish(system);
    }

    /// Emit a prepared system event; returns the number of receivers.
    pub fn publish(&self, system: SystemEvent) -> usize {
        self.bus.emit(Event::system(system, self.bus.now()))
    }

    /// Emit an informational system event.
    pub fn info(&self, message: impl Into<String>) -> usize {
        self.publish(SystemEvent::info(message))
    }

    /// Emit an error system event.
    pub fn error(&self, message: impl Into<String>) -> usize {
        self.publish(SystemEvent::error(message))
    }

    /// Emit a domain event announcing that record `id` of `kind` changed.
    pub fn publish_change(&self, kind: EntityKind, change: ChangeKind, id: EntityId) -> usize {
        let event_type = EventType::Domain { kind, change };
        self.bus.emit(Event::domain(event_type, id, self.bus.now()))
    }
}

//! # Biblioteca Sync Core
//!
//! Core types for keeping independent library-management views consistent
//! after any create, update or delete.
//!
//! There is no shared store. Producers emit [`Event`](event::Event)s onto an
//! [`EventBus`](event_bus::EventBus) and every consumer holding a live
//! subscription reacts on its own, typically by reloading its data.
//!
//! ## Core Concepts
//!
//! - **Entity vocabulary**: [`EntityKind`](entity::EntityKind) and
//!   [`ChangeKind`](entity::ChangeKind) form a closed set of domain event types
//! - **Event**: immutable `{ type, payload, timestamp }`, dropped after dispatch
//! - **Event bus**: synchronous, snapshot-then-dispatch fan-out keyed by event type
//! - **Subscription lifecycle**: guards that release registrations on every exit path
//! - **Publisher**: one-call emission of system (diagnostic) events
//!
//! ## Example
//!
//! ```
//! use biblioteca_sync_core::entity::{EntityId, EntityKind};
//! use biblioteca_sync_core::event::{Event, EventType};
//! use biblioteca_sync_core::event_bus::EventBus;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let bus = EventBus::new();
//! let reloads = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&reloads);
//! let _books = bus
//!     .on(EventType::created(EntityKind::Book), move |_event| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .scoped();
//!
//! bus.emit(Event::domain(EventType::created(EntityKind::Book), EntityId::new(7), bus.now()));
//! assert_eq!(reloads.load(Ordering::SeqCst), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Managed entity kinds and identifiers
pub mod entity;

/// Event types, events and system-event payloads
pub mod event;

/// Process-local publish/subscribe registry
pub mod event_bus;

/// Scoped subscriptions bound to a consumer's lifetime
pub mod subscription;

/// One-call emission of system events
pub mod publisher;

/// Environment module - Dependency injection traits
///
/// All time reads go through [`Clock`](environment::Clock) so that
/// event timestamps are deterministic under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use biblioteca_sync_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation used outside of tests.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use entity::{ChangeKind, EntityId, EntityKind};
pub use environment::{Clock, SystemClock};
pub use event::{Event, EventPayload, EventType, Metadata, Severity, SystemEvent};
pub use event_bus::{Callback, EventBus, SubscriberError, Subscription, SubscriptionId};
pub use publisher::Publisher;
pub use subscription::{ScopedSubscription, SubscriptionBinding, SubscriptionScope};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}

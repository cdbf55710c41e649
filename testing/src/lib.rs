//! # Biblioteca Sync Testing
//!
//! Testing utilities for the sync layer.
//!
//! This crate provides:
//! - [`FixedClock`] for deterministic event timestamps
//! - [`MockLibraryClient`], an in-memory backend with scripted failures
//! - [`EventRecorder`], which captures what reached the bus
//! - proptest strategies for the event vocabulary
//!
//! ## Example
//!
//! ```
//! use biblioteca_sync_core::entity::EntityKind;
//! use biblioteca_sync_core::event::EventType;
//! use biblioteca_sync_core::event_bus::EventBus;
//! use biblioteca_sync_core::publisher::Publisher;
//! use biblioteca_sync_testing::EventRecorder;
//! use biblioteca_sync_core::entity::{ChangeKind, EntityId};
//!
//! let bus = EventBus::new();
//! let recorder = EventRecorder::new(&bus, [EventType::created(EntityKind::Book)]);
//!
//! Publisher::new(&bus).publish_change(EntityKind::Book, ChangeKind::Created, EntityId::new(1));
//! assert_eq!(recorder.count(EventType::created(EntityKind::Book)), 1);
//! ```

use biblioteca_sync_core::environment::Clock;
use chrono::{DateTime, Utc};

/// In-memory stand-in for the REST backend
pub mod mock_client;

/// Bus event capture
pub mod recorder;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making event timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use biblioteca_sync_testing::mocks::FixedClock;
    /// use biblioteca_sync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use super::mocks::test_clock;
    use biblioteca_sync_core::event_bus::EventBus;
    use std::sync::Arc;

    /// A fresh bus stamped by [`test_clock`].
    #[must_use]
    pub fn test_bus() -> EventBus {
        EventBus::with_clock(Arc::new(test_clock()))
    }

    /// Route `tracing` output to the test harness, honouring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use biblioteca_sync_core::entity::{ChangeKind, EntityKind};
    use biblioteca_sync_core::event::{EventType, Severity};
    use proptest::prelude::*;

    /// Any managed entity kind.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    /// Any change kind.
    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop::sample::select(ChangeKind::ALL.to_vec())
    }

    /// Any event type, the system channel included.
    pub fn arb_event_type() -> impl Strategy<Value = EventType> {
        prop_oneof![
            4 => (arb_entity_kind(), arb_change_kind())
                .prop_map(|(kind, change)| EventType::Domain { kind, change }),
            1 => Just(EventType::System),
        ]
    }

    /// Either severity.
    pub fn arb_severity() -> impl Strategy<Value = Severity> {
        prop_oneof![Just(Severity::Info), Just(Severity::Error)]
    }
}

// Re-export commonly used items
pub use helpers::{init_test_tracing, test_bus};
pub use mock_client::{MockCall, MockLibraryClient};
pub use mocks::{FixedClock, test_clock};
pub use recorder::EventRecorder;

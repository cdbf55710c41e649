//! Event types and event values carried by the bus.
//!
//! Events represent facts that have already happened. They are created at
//! emission time, never mutated, and discarded once every subscriber in the
//! dispatch snapshot has been notified. There is no replay buffer: a
//! subscriber registered after an emission never sees it.
//!
//! # Event type vocabulary
//!
//! | Event type                     | Payload                       |
//! |--------------------------------|-------------------------------|
//! | `{KIND}_CREATED`               | [`EventPayload::Entity`]      |
//! | `{KIND}_UPDATED`               | [`EventPayload::Entity`]      |
//! | `{KIND}_DELETED`               | [`EventPayload::Entity`]      |
//! | `SYSTEM` (reserved)            | [`EventPayload::System`]      |
//!
//! `KIND` is one of `AUTHOR`, `BOOK`, `LOAN`, `USER`.

use crate::entity::{ChangeKind, EntityId, EntityKind, parse_domain_tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Name of the reserved system channel.
pub const SYSTEM_EVENT_NAME: &str = "SYSTEM";

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Unknown event type encountered while parsing a name.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Identifier of a bus channel.
///
/// A closed enumeration: every domain type is a `(kind, change)` pair and
/// there is exactly one reserved system channel. Using it as the registry
/// key means a misspelled event name cannot compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventType {
    /// A state change of a managed entity.
    Domain {
        /// Which kind of record changed
        kind: EntityKind,
        /// How it changed
        change: ChangeKind,
    },
    /// Diagnostics and metrics channel.
    System,
}

impl EventType {
    /// `{KIND}_CREATED`
    #[must_use]
    pub const fn created(kind: EntityKind) -> Self {
        Self::Domain {
            kind,
            change: ChangeKind::Created,
        }
    }

    /// `{KIND}_UPDATED`
    #[must_use]
    pub const fn updated(kind: EntityKind) -> Self {
        Self::Domain {
            kind,
            change: ChangeKind::Updated,
        }
    }

    /// `{KIND}_DELETED`
    #[must_use]
    pub const fn deleted(kind: EntityKind) -> Self {
        Self::Domain {
            kind,
            change: ChangeKind::Deleted,
        }
    }

    /// All three domain event types of one entity kind.
    #[must_use]
    pub const fn changes_of(kind: EntityKind) -> [Self; 3] {
        [Self::created(kind), Self::updated(kind), Self::deleted(kind)]
    }

    /// Whether this is the reserved system channel.
    #[must_use]
    pub const fn is_system(self) -> bool {
        matches!(self, Self::System)
    }

    /// The entity kind of a domain event type.
    #[must_use]
    pub const fn entity_kind(self) -> Option<EntityKind> {
        match self {
            Self::Domain { kind, .. } => Some(kind),
            Self::System => None,
        }
    }

    /// The change kind of a domain event type.
    #[must_use]
    pub const fn change_kind(self) -> Option<ChangeKind> {
        match self {
            Self::Domain { change, .. } => Some(change),
            Self::System => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain { kind, change } => write!(f, "{}_{}", kind.tag(), change.tag()),
            Self::System => f.write_str(SYSTEM_EVENT_NAME),
        }
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == SYSTEM_EVENT_NAME {
            return Ok(Self::System);
        }
        parse_domain_tag(s)
            .map(|(kind, change)| Self::Domain { kind, change })
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

impl TryFrom<String> for EventType {
    type Error = EventError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.to_string()
    }
}

/// Severity of a system event.
///
/// Deserialization goes through [`Severity::parse_lenient`], so an unknown
/// value read from outside becomes [`Severity::Info`] instead of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Severity {
    /// Informational; counted as processed
    #[default]
    Info,
    /// A failure; counted as an error
    Error,
}

impl Severity {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
        }
    }

    /// Parse a severity coming from outside the type system.
    ///
    /// Only `error` (any case) maps to [`Severity::Error`]. Every other
    /// value, including unknown ones such as `warning`, maps to
    /// [`Severity::Info`] so that it is counted as processed rather than
    /// silently dropped.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "info" => Self::Info,
            other => {
                tracing::debug!(severity = other, "Unrecognized severity, treating as info");
                Self::Info
            }
        }
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form key/value metadata attached to a system event.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Payload of the reserved system channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    /// Human-readable description
    pub message: String,
    /// Info or error
    pub severity: Severity,
    /// Optional structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl SystemEvent {
    /// Create a system event without metadata.
    #[must_use]
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            metadata: None,
        }
    }

    /// Informational event.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Info)
    }

    /// Error event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message, Severity::Error)
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up one metadata entry.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

/// Structured data carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Identifier of the affected record
    Entity(EntityId),
    /// System-channel payload
    System(SystemEvent),
}

/// A value delivered to subscribers.
///
/// Fields are private; an event cannot be altered after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: EventType,
    payload: Option<EventPayload>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub const fn new(
        event_type: EventType,
        payload: Option<EventPayload>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            payload,
            timestamp,
        }
    }

    /// A domain event carrying the affected record's id.
    #[must_use]
    pub const fn domain(event_type: EventType, id: EntityId, timestamp: DateTime<Utc>) -> Self {
        Self::new(event_type, Some(EventPayload::Entity(id)), timestamp)
    }

    /// An event on the reserved system channel.
    #[must_use]
    pub const fn system(system: SystemEvent, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventType::System, Some(EventPayload::System(system)), timestamp)
    }

    /// The channel this event is dispatched on.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// The payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&EventPayload> {
        self.payload.as_ref()
    }

    /// When the event was emitted.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The affected record, for domain events.
    #[must_use]
    pub const fn entity_id(&self) -> Option<EntityId> {
        match &self.payload {
            Some(EventPayload::Entity(id)) => Some(*id),
            _ => None,
        }
    }

    /// The system payload, for system events.
    #[must_use]
    pub const fn system_event(&self) -> Option<&SystemEvent> {
        match &self.payload {
            Some(EventPayload::System(system)) => Some(system),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(EventPayload::Entity(id)) => write!(f, "{} #{id}", self.event_type),
            Some(EventPayload::System(system)) => {
                write!(f, "{} [{}] {}", self.event_type, system.severity, system.message)
            }
            None => write!(f, "{}", self.event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    #[test]
    fn event_type_names_follow_kind_change_convention() {
        assert_eq!(EventType::created(EntityKind::Book).to_string(), "BOOK_CREATED");
        assert_eq!(EventType::updated(EntityKind::Loan).to_string(), "LOAN_UPDATED");
        assert_eq!(EventType::deleted(EntityKind::Author).to_string(), "AUTHOR_DELETED");
        assert_eq!(EventType::System.to_string(), "SYSTEM");
    }

    #[test]
    fn event_type_parse_accepts_only_the_closed_vocabulary() {
        assert_eq!("USER_DELETED".parse(), Ok(EventType::deleted(EntityKind::User)));
        assert_eq!("SYSTEM".parse(), Ok(EventType::System));
        assert_eq!(
            "BOOK_BORROWED".parse::<EventType>(),
            Err(EventError::UnknownEventType("BOOK_BORROWED".to_string()))
        );
    }

    #[test]
    fn changes_of_lists_all_three_domain_types() {
        let types = EventType::changes_of(EntityKind::Book);
        assert!(types.iter().all(|t| t.entity_kind() == Some(EntityKind::Book)));
        assert_eq!(types[2].change_kind(), Some(ChangeKind::Deleted));
    }

    #[test]
    fn lenient_severity_defaults_unknown_values_to_info() {
        assert_eq!(Severity::parse_lenient("error"), Severity::Error);
        assert_eq!(Severity::parse_lenient(" ERROR "), Severity::Error);
        assert_eq!(Severity::parse_lenient("info"), Severity::Info);
        assert_eq!(Severity::parse_lenient("warning"), Severity::Info);
        assert_eq!(Severity::parse_lenient(""), Severity::Info);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if deserialization rejects the payload
    fn deserialized_severity_is_lenient() {
        let warning: SystemEvent =
            serde_json::from_str(r#"{"message":"m","severity":"warning"}"#)
                .expect("unknown severity should deserialize");
        assert_eq!(warning.severity, Severity::Info);

        let error: SystemEvent = serde_json::from_str(r#"{"message":"m","severity":"ERROR"}"#)
            .expect("upper-case severity should deserialize");
        assert_eq!(error.severity, Severity::Error);

        let json = serde_json::to_value(SystemEvent::error("m")).expect("serialization should succeed");
        assert_eq!(json["severity"], "error");
    }

    #[test]
    fn system_event_metadata_accumulates() {
        let system = SystemEvent::info("Book created")
            .with_metadata("kind", "book")
            .with_metadata("id", 3);

        assert_eq!(system.metadata_value("kind"), Some(&serde_json::json!("book")));
        assert_eq!(system.metadata_value("id"), Some(&serde_json::json!(3)));
        assert_eq!(system.metadata_value("missing"), None);
    }

    #[test]
    fn accessors_expose_payload_by_shape() {
        let domain = Event::domain(EventType::created(EntityKind::Book), EntityId::new(9), epoch());
        assert_eq!(domain.entity_id(), Some(EntityId::new(9)));
        assert!(domain.system_event().is_none());

        let system = Event::system(SystemEvent::error("boom"), epoch());
        assert!(system.event_type().is_system());
        assert_eq!(system.system_event().map(|s| s.severity), Some(Severity::Error));
        assert_eq!(system.entity_id(), None);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn event_serializes_type_by_name() {
        let event = Event::domain(EventType::updated(EntityKind::User), EntityId::new(1), epoch());
        let json = serde_json::to_value(&event).expect("serialization should succeed");
        assert_eq!(json["event_type"], "USER_UPDATED");
        assert_eq!(json["payload"]["data"], 1);
    }

    #[test]
    fn display_is_compact() {
        let event = Event::domain(EventType::deleted(EntityKind::Loan), EntityId::new(5), epoch());
        assert_eq!(event.to_string(), "LOAN_DELETED #5");
    }
}

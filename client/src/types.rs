//! Request and response bodies exchanged with the backend.
//!
//! Field names follow the backend's JSON (`nombre`, `autorId`, ...); the Rust
//! side uses English names and maps them with `serde(rename)`.

use biblioteca_sync_core::entity::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};

/// A stored record as returned by the backend.
///
/// Only the identifier is interpreted; every other field is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Backend identifier
    pub id: EntityId,
    /// Remaining fields, untouched
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Record with no fields besides its id.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: serde_json::Map::new(),
        }
    }

    /// Add a field (builder pattern)
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// A field by its backend name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}

/// A request body bound to the entity kind it creates or updates.
pub trait EntityRequest: Serialize {
    /// Kind of record this body describes
    const KIND: EntityKind;
}

/// Body for creating or updating an author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRequest {
    /// Full name
    #[serde(rename = "nombre")]
    pub name: String,
    /// Nationality, if known
    #[serde(rename = "nacionalidad", skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
}

impl AuthorRequest {
    /// Author with a name only.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nationality: None,
        }
    }

    /// Set the nationality (builder pattern)
    #[must_use]
    pub fn with_nationality(mut self, nationality: impl Into<String>) -> Self {
        self.nationality = Some(nationality.into());
        self
    }
}

impl EntityRequest for AuthorRequest {
    const KIND: EntityKind = EntityKind::Author;
}

/// Body for creating or updating a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRequest {
    /// Title
    #[serde(rename = "titulo")]
    pub title: String,
    /// Author of the book
    #[serde(rename = "autorId")]
    pub author_id: EntityId,
    /// Availability for loan; the backend defaults it on create
    #[serde(rename = "disponible", skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
}

impl BookRequest {
    /// Book by `author_id`.
    #[must_use]
    pub fn new(title: impl Into<String>, author_id: EntityId) -> Self {
        Self {
            title: title.into(),
            author_id,
            available: None,
        }
    }

    /// Set availability (builder pattern)
    #[must_use]
    pub const fn with_available(mut self, available: bool) -> Self {
        self.available = Some(available);
        self
    }
}

impl EntityRequest for BookRequest {
    const KIND: EntityKind = EntityKind::Book;
}

/// Body for lending a book to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    /// Borrowing user
    #[serde(rename = "usuarioId")]
    pub user_id: EntityId,
    /// Borrowed book
    #[serde(rename = "libroId")]
    pub book_id: EntityId,
}

impl LoanRequest {
    #[must_use]
    pub const fn new(user_id: EntityId, book_id: EntityId) -> Self {
        Self { user_id, book_id }
    }
}

impl EntityRequest for LoanRequest {
    const KIND: EntityKind = EntityKind::Loan;
}

/// Body for creating or updating a library member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequest {
    #[serde(rename = "nombre")]
    pub name: String,
    pub email: String,
}

impl UserRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl EntityRequest for UserRequest {
    const KIND: EntityKind = EntityKind::User;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn book_request_uses_backend_field_names() {
        let body = serde_json::to_value(BookRequest::new("Ficciones", EntityId::new(3)))
            .expect("serialization should succeed");
        assert_eq!(body, json!({"titulo": "Ficciones", "autorId": 3}));

        let body = serde_json::to_value(BookRequest::new("Ficciones", EntityId::new(3)).with_available(false))
            .expect("serialization should succeed");
        assert_eq!(body["disponible"], json!(false));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn loan_and_user_requests_serialize() {
        let loan = serde_json::to_value(LoanRequest::new(EntityId::new(7), EntityId::new(9)))
            .expect("serialization should succeed");
        assert_eq!(loan, json!({"usuarioId": 7, "libroId": 9}));

        let user = serde_json::to_value(UserRequest::new("Ana", "ana@example.org"))
            .expect("serialization should succeed");
        assert_eq!(user, json!({"nombre": "Ana", "email": "ana@example.org"}));

        let author = serde_json::to_value(AuthorRequest::new("Borges").with_nationality("Argentina"))
            .expect("serialization should succeed");
        assert_eq!(author, json!({"nombre": "Borges", "nacionalidad": "Argentina"}));
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if deserialization fails
    fn record_keeps_unknown_fields() {
        let record: Record = serde_json::from_value(json!({
            "id": 5,
            "titulo": "Rayuela",
            "disponible": true
        }))
        .expect("deserialization should succeed");

        assert_eq!(record.id, EntityId::new(5));
        assert_eq!(record.field("titulo"), Some(&json!("Rayuela")));
        assert_eq!(record.field("id"), None);
    }

    #[test]
    fn request_kinds() {
        assert_eq!(AuthorRequest::KIND, EntityKind::Author);
        assert_eq!(BookRequest::KIND, EntityKind::Book);
        assert_eq!(LoanRequest::KIND, EntityKind::Loan);
        assert_eq!(UserRequest::KIND, EntityKind::User);
    }
}

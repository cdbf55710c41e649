//! Managed entity kinds and identifiers.
//!
//! The vocabulary is closed: adding a new kind of record means adding a
//! variant here, which in turn yields its `{KIND}_CREATED`, `{KIND}_UPDATED`
//! and `{KIND}_DELETED` event types. The bus itself never changes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A kind of record managed by the library backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A book author
    Author,
    /// A catalogued book
    Book,
    /// A loan of a book to a user
    Loan,
    /// A library member
    User,
}

impl EntityKind {
    /// Every managed kind, in declaration order.
    pub const ALL: [Self; 4] = [Self::Author, Self::Book, Self::Loan, Self::User];

    /// Upper-case tag used in event type names (`BOOK` in `BOOK_CREATED`).
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Author => "AUTHOR",
            Self::Book => "BOOK",
            Self::Loan => "LOAN",
            Self::User => "USER",
        }
    }

    /// Singular lower-case label for messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Book => "book",
            Self::Loan => "loan",
            Self::User => "user",
        }
    }

    /// Plural lower-case label for messages.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Author => "authors",
            Self::Book => "books",
            Self::Loan => "loans",
            Self::User => "users",
        }
    }

    /// REST collection path on the backend.
    #[must_use]
    pub const fn collection_path(self) -> &'static str {
        match self {
            Self::Author => "/api/authors",
            Self::Book => "/api/books",
            Self::Loan => "/api/loans",
            Self::User => "/api/users",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The kind of state change a domain event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A record was created
    Created,
    /// A record was modified
    Updated,
    /// A record was removed
    Deleted,
}

impl ChangeKind {
    /// Every change kind, in declaration order.
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Deleted];

    /// Upper-case suffix used in event type names.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        }
    }

    /// Past-tense verb for messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|change| change.tag() == tag)
    }
}

/// Parse `{KIND}_{CHANGE}` into its parts.
pub(crate) fn parse_domain_tag(name: &str) -> Option<(EntityKind, ChangeKind)> {
    let (kind, change) = name.split_once('_')?;
    Some((EntityKind::from_tag(kind)?, ChangeKind::from_tag(change)?))
}

/// Backend identifier of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Wrap a raw backend identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_tags_parse_for_every_pair() {
        for kind in EntityKind::ALL {
            for change in ChangeKind::ALL {
                let name = format!("{}_{}", kind.tag(), change.tag());
                assert_eq!(parse_domain_tag(&name), Some((kind, change)));
            }
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(parse_domain_tag("MAGAZINE_CREATED"), None);
        assert_eq!(parse_domain_tag("BOOK_ARCHIVED"), None);
        assert_eq!(parse_domain_tag("BOOK"), None);
        assert_eq!(parse_domain_tag("book_created"), None);
    }

    #[test]
    fn collection_paths_follow_backend_routes() {
        assert_eq!(EntityKind::Book.collection_path(), "/api/books");
        assert_eq!(EntityKind::Loan.collection_path(), "/api/loans");
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn entity_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&EntityId::new(42)).expect("serialization should succeed");
        assert_eq!(json, "42");
    }
}

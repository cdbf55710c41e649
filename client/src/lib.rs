//! # Biblioteca REST Client
//!
//! HTTP access to the library backend's CRUD endpoints, consumed by the
//! reactive sync layer.
//!
//! The runtime depends only on the [`LibraryClient`] trait; [`RestClient`] is
//! the `reqwest` implementation used in production and tests substitute an
//! in-memory mock.
//!
//! ## Example
//!
//! ```no_run
//! use biblioteca_sync_client::{LibraryClient, RestClient};
//! use biblioteca_sync_client::types::BookRequest;
//! use biblioteca_sync_core::entity::{EntityId, EntityKind};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::new("http://localhost:8080", Duration::from_secs(10))?;
//!
//!     let body = serde_json::to_value(BookRequest::new("Rayuela", EntityId::new(1)))?;
//!     let book = client.create(EntityKind::Book, body).await?;
//!     println!("created book {}", book.id);
//!
//!     let books = client.list(EntityKind::Book).await?;
//!     println!("{} books", books.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Endpoints
//!
//! | Operation     | Request                          |
//! |---------------|----------------------------------|
//! | `list`        | `GET    /api/{kind}`             |
//! | `get`         | `GET    /api/{kind}/{id}`        |
//! | `create`      | `POST   /api/{kind}`             |
//! | `update`      | `PUT    /api/{kind}/{id}`        |
//! | `delete`      | `DELETE /api/{kind}/{id}`        |
//! | `return_loan` | `PUT    /api/loans/{id}/return`  |

use biblioteca_sync_core::entity::{EntityId, EntityKind};
use std::future::Future;
use std::pin::Pin;

pub mod client;
pub mod error;
pub mod types;

// Re-export main types for convenience
pub use client::RestClient;
pub use error::ClientError;
pub use types::{AuthorRequest, BookRequest, EntityRequest, LoanRequest, Record, UserRequest};

/// Boxed future returned by [`LibraryClient`] methods.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Request/response access to the backend, one method per verb.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures instead of using `async fn` so the trait can
/// be shared as `Arc<dyn LibraryClient>` by the reactive API.
pub trait LibraryClient: Send + Sync {
    /// Fetch every record of `kind`.
    fn list(&self, kind: EntityKind) -> ClientFuture<'_, Vec<Record>>;

    /// Fetch one record.
    fn get(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, Record>;

    /// Create a record from a JSON body; returns the stored record.
    fn create(&self, kind: EntityKind, body: serde_json::Value) -> ClientFuture<'_, Record>;

    /// Replace a record's fields; returns the stored record.
    fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        body: serde_json::Value,
    ) -> ClientFuture<'_, Record>;

    /// Remove a record.
    fn delete(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, ()>;

    /// Mark a loan as returned; returns the updated loan.
    fn return_loan(&self, id: EntityId) -> ClientFuture<'_, Record>;
}

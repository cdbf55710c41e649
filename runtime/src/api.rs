//! Reactive wrapper over the backend client.
//!
//! Every call starts the network request on the ambient tokio runtime and
//! returns an [`OperationHandle`] immediately. When the request finishes the
//! wrapper reports on the bus, then settles the handle:
//!
//! | Outcome             | Emitted, in order                                   |
//! |---------------------|-----------------------------------------------------|
//! | mutation succeeded  | `info` system event, then `{KIND}_{CHANGE}`         |
//! | read succeeded      | nothing                                             |
//! | anything failed     | `error` system event                                |
//!
//! Emission always happens before `on_next`/`on_error` and `on_complete`, so an
//! observer that sees completion can rely on every page having been notified.

use crate::error::ApiError;
use crate::metrics::{BusMetrics, OperationMetrics, Outcome};
use crate::operation::{OperationHandle, Settler};
use biblioteca_sync_client::{ClientError, EntityRequest, LibraryClient, Record};
use biblioteca_sync_core::entity::{ChangeKind, EntityId, EntityKind};
use biblioteca_sync_core::event::SystemEvent;
use biblioteca_sync_core::event_bus::EventBus;
use biblioteca_sync_core::publisher::Publisher;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// What an operation does to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    List,
    Get,
    Create,
    Update,
    Delete,
    Return,
}

impl Verb {
    const fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Return => "return",
        }
    }

    /// Domain change announced on success; reads announce nothing.
    const fn change(self) -> Option<ChangeKind> {
        match self {
            Self::List | Self::Get => None,
            Self::Create => Some(ChangeKind::Created),
            Self::Update | Self::Return => Some(ChangeKind::Updated),
            Self::Delete => Some(ChangeKind::Deleted),
        }
    }

    fn fallback_message(self, kind: EntityKind) -> String {
        match self {
            Self::List => format!("Failed to load {}", kind.plural()),
            Self::Get => format!("Failed to load {}", kind.label()),
            Self::Create => format!("Failed to create {}", kind.label()),
            Self::Update => format!("Failed to update {}", kind.label()),
            Self::Delete => format!("Failed to delete {}", kind.label()),
            Self::Return => format!("Failed to return {}", kind.label()),
        }
    }

    fn success_message(self, kind: EntityKind, id: EntityId) -> String {
        match self {
            Self::Return => format!("Returned {} {id}", kind.label()),
            _ => {
                let verb = self.change().map_or(self.as_str(), ChangeKind::verb);
                let mut label = kind.label().to_string();
                if let Some(first) = label.get_mut(..1) {
                    first.make_ascii_uppercase();
                }
                format!("{label} {id} {verb}")
            }
        }
    }
}

/// One operation's identity, used for events, logs and metrics.
#[derive(Debug, Clone, Copy)]
struct Operation {
    verb: Verb,
    kind: EntityKind,
    target: Option<EntityId>,
}

impl Operation {
    const fn new(verb: Verb, kind: EntityKind) -> Self {
        Self {
            verb,
            kind,
            target: None,
        }
    }

    const fn on(mut self, id: EntityId) -> Self {
        self.target = Some(id);
        self
    }

    fn normalize(&self, error: &ClientError) -> ApiError {
        tracing::debug!(%error, "Backend call failed");
        ApiError::from_client(error, self.verb.fallback_message(self.kind))
    }

    fn describe(&self, system: SystemEvent, id: Option<EntityId>) -> SystemEvent {
        let system = system
            .with_metadata("kind", self.kind.label())
            .with_metadata("verb", self.verb.as_str());
        match id.or(self.target) {
            Some(id) => system.with_metadata("id", id.get()),
            None => system,
        }
    }
}

/// Subscribable CRUD operations that keep every page in step.
///
/// # Examples
///
/// ```no_run
/// use biblioteca_sync_client::{Record, RestClient};
/// use biblioteca_sync_client::types::AuthorRequest;
/// use biblioteca_sync_core::event_bus::EventBus;
/// use biblioteca_sync_runtime::api::ReactiveApi;
/// use biblioteca_sync_runtime::operation::Observer;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = EventBus::new();
/// let client = RestClient::new("http://localhost:8080", Duration::from_secs(10))?;
/// let api = ReactiveApi::new(Arc::new(client), &bus);
///
/// let subscription = api
///     .create_entity(&AuthorRequest::new("Gabriela Mistral"))
///     .subscribe(
///         Observer::new()
///             .on_next(|author: Record| println!("created {}", author.id))
///             .on_error(|error| eprintln!("{error}")),
///     );
/// subscription.done().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ReactiveApi {
    client: Arc<dyn LibraryClient>,
    publisher: Publisher,
}

impl ReactiveApi {
    /// Wrap `client`, reporting on `bus`.
    #[must_use]
    pub fn new(client: Arc<dyn LibraryClient>, bus: &EventBus) -> Self {
        Self {
            client,
            publisher: Publisher::new(bus),
        }
    }

    /// The bus operations report on.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        self.publisher.bus()
    }

    /// Load every record of `kind`.
    #[tracing::instrument(skip(self), fields(verb = "list"))]
    pub fn list(&self, kind: EntityKind) -> OperationHandle<Vec<Record>> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::List, kind),
            Box::pin(async move { client.list(kind).await }),
            |_| None,
        )
    }

    /// Load one record.
    #[tracing::instrument(skip(self), fields(verb = "get"))]
    pub fn get(&self, kind: EntityKind, id: EntityId) -> OperationHandle<Record> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::Get, kind).on(id),
            Box::pin(async move { client.get(kind, id).await }),
            |_| None,
        )
    }

    /// Create a record from a raw JSON body.
    #[tracing::instrument(skip(self, body), fields(verb = "create"))]
    pub fn create(&self, kind: EntityKind, body: serde_json::Value) -> OperationHandle<Record> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::Create, kind),
            Box::pin(async move { client.create(kind, body).await }),
            |record| Some(record.id),
        )
    }

    /// Create a record from a typed request body.
    pub fn create_entity<R: EntityRequest>(&self, request: &R) -> OperationHandle<Record> {
        match serde_json::to_value(request) {
            Ok(body) => self.create(R::KIND, body),
            Err(e) => self.reject(Operation::new(Verb::Create, R::KIND), &e),
        }
    }

    /// Replace the fields of record `id`.
    #[tracing::instrument(skip(self, body), fields(verb = "update"))]
    pub fn update(
        &self,
        kind: EntityKind,
        id: EntityId,
        body: serde_json::Value,
    ) -> OperationHandle<Record> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::Update, kind).on(id),
            Box::pin(async move { client.update(kind, id, body).await }),
            |_| None,
        )
    }

    /// Replace the fields of record `id` from a typed request body.
    pub fn update_entity<R: EntityRequest>(
        &self,
        id: EntityId,
        request: &R,
    ) -> OperationHandle<Record> {
        match serde_json::to_value(request) {
            Ok(body) => self.update(R::KIND, id, body),
            Err(e) => self.reject(Operation::new(Verb::Update, R::KIND).on(id), &e),
        }
    }

    /// Remove record `id`; succeeds with the removed id.
    #[tracing::instrument(skip(self), fields(verb = "delete"))]
    pub fn delete(&self, kind: EntityKind, id: EntityId) -> OperationHandle<EntityId> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::Delete, kind).on(id),
            Box::pin(async move { client.delete(kind, id).await.map(|()| id) }),
            |_| None,
        )
    }

    /// Mark loan `id` as returned. Announced as `LOAN_UPDATED`.
    #[tracing::instrument(skip(self), fields(verb = "return"))]
    pub fn return_loan(&self, id: EntityId) -> OperationHandle<Record> {
        let client = Arc::clone(&self.client);
        self.run(
            Operation::new(Verb::Return, EntityKind::Loan).on(id),
            Box::pin(async move { client.return_loan(id).await }),
            |_| None,
        )
    }

    fn run<T>(
        &self,
        operation: Operation,
        call: BoxFuture<'static, Result<T, ClientError>>,
        affected: fn(&T) -> Option<EntityId>,
    ) -> OperationHandle<T>
    where
        T: Send + 'static,
    {
        let (handle, settler) = OperationHandle::pending();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("Reactive operation started outside a tokio runtime");
            let error = ApiError::aborted("no async runtime available");
            report(&self.publisher, operation, Err(error), |_| None, settler);
            return handle;
        };

        let span = tracing::info_span!(
            "operation",
            id = %handle.id(),
            verb = operation.verb.as_str(),
            kind = %operation.kind,
        );
        let pending = PendingReport {
            publisher: self.publisher.clone(),
            operation,
            settler: Some(settler),
        };
        runtime.spawn(
            async move {
                let outcome = call.await.map_err(|error| operation.normalize(&error));
                pending.finish(outcome, affected);
            }
            .instrument(span),
        );

        handle
    }

    fn reject<T>(&self, operation: Operation, error: &serde_json::Error) -> OperationHandle<T> {
        let error = operation.normalize(&ClientError::InvalidRequest(error.to_string()));
        let (handle, settler) = OperationHandle::pending();
        report(&self.publisher, operation, Err(error), |_| None, settler);
        handle
    }
}

impl fmt::Debug for ReactiveApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveApi")
            .field("bus", self.publisher.bus())
            .finish_non_exhaustive()
    }
}

/// Reports the operation when its task finishes or is dropped unfinished.
///
/// A task is dropped without finishing when the runtime shuts down or the
/// backend call panics; the operation then fails as interrupted, with the
/// same error system event as any other failure.
struct PendingReport<T> {
    publisher: Publisher,
    operation: Operation,
    settler: Option<Settler<T>>,
}

impl<T> PendingReport<T> {
    fn finish(mut self, outcome: Result<T, ApiError>, affected: fn(&T) -> Option<EntityId>) {
        if let Some(settler) = self.settler.take() {
            report(&self.publisher, self.operation, outcome, affected, settler);
        }
    }
}

impl<T> Drop for PendingReport<T> {
    fn drop(&mut self) {
        if let Some(settler) = self.settler.take() {
            tracing::warn!(operation = ?settler.id(), "Operation task dropped before finishing");
            let error = ApiError::aborted("operation was interrupted");
            report(&self.publisher, self.operation, Err(error), |_| None, settler);
        }
    }
}

/// Emit the outcome on the bus, then settle the handle.
fn report<T>(
    publisher: &Publisher,
    operation: Operation,
    outcome: Result<T, ApiError>,
    affected: fn(&T) -> Option<EntityId>,
    settler: Settler<T>,
) {
    let Operation { verb, kind, target } = operation;

    let outcome = match outcome {
        Ok(value) => {
            OperationMetrics::record(verb.as_str(), kind, Outcome::Success);
            let id = affected(&value).or(target);
            match (verb.change(), id) {
                (Some(change), Some(id)) => {
                    tracing::info!(%id, "Operation succeeded");
                    let message = verb.success_message(kind, id);
                    publisher.publish(operation.describe(SystemEvent::info(message), Some(id)));
                    publisher.publish_change(kind, change, id);
                }
                _ => tracing::debug!("Operation succeeded"),
            }
            Ok(value)
        }
        Err(api_error) => {
            OperationMetrics::record(verb.as_str(), kind, Outcome::Failure);
            tracing::error!(kind = ?api_error.kind, message = %api_error.message, "Operation failed");

            let mut system = operation.describe(SystemEvent::error(api_error.message.clone()), None);
            if let Some(status) = api_error.status {
                system = system.with_metadata("status", status);
            }
            publisher.publish(system);
            Err(api_error)
        }
    };

    BusMetrics::record_totals(publisher.bus());
    if settler.is_disposed() {
        tracing::debug!("Handle disposed; outcome not delivered");
    }
    settler.settle(outcome);
}

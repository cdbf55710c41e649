//! A [`LibraryClient`] backed by in-memory tables.
//!
//! Behaves like the real backend for the happy paths (ids are assigned on
//! create, missing records answer 404, a returned loan cannot be returned
//! twice) and can be scripted to fail or to hold requests until released.

use biblioteca_sync_client::{ClientError, ClientFuture, LibraryClient, Record};
use biblioteca_sync_core::entity::{EntityId, EntityKind};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// One request seen by the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCall {
    /// `list`, `get`, `create`, `update`, `delete` or `return`
    pub verb: &'static str,
    /// Collection addressed
    pub kind: EntityKind,
    /// Record addressed, if any
    pub id: Option<EntityId>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    rows: BTreeMap<EntityKind, BTreeMap<EntityId, Map<String, Value>>>,
    failures: VecDeque<ClientError>,
    calls: Vec<MockCall>,
}

impl Tables {
    fn assign_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::new(self.next_id)
    }

    fn table(&mut self, kind: EntityKind) -> &mut BTreeMap<EntityId, Map<String, Value>> {
        self.rows.entry(kind).or_default()
    }

    fn fetch(&mut self, kind: EntityKind, id: EntityId) -> Result<Record, ClientError> {
        self.table(kind)
            .get(&id)
            .map(|fields| Record {
                id,
                fields: fields.clone(),
            })
            .ok_or_else(|| not_found(kind, id))
    }
}

fn not_found(kind: EntityKind, id: EntityId) -> ClientError {
    ClientError::Status {
        status: 404,
        message: Some(format!("Error: {} {id} not found", kind.label())),
    }
}

fn object_body(body: Value) -> Result<Map<String, Value>, ClientError> {
    match body {
        Value::Object(mut fields) => {
            fields.remove("id");
            Ok(fields)
        }
        _ => Err(ClientError::Status {
            status: 400,
            message: Some("Error: request body must be a JSON object".to_string()),
        }),
    }
}

/// In-memory backend.
///
/// # Example
///
/// ```
/// use biblioteca_sync_client::{ClientError, LibraryClient};
/// use biblioteca_sync_core::entity::EntityKind;
/// use biblioteca_sync_testing::MockLibraryClient;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let client = MockLibraryClient::new();
/// let author = client.create(EntityKind::Author, json!({"nombre": "Borges"})).await.unwrap();
/// assert_eq!(client.records(EntityKind::Author), vec![author]);
///
/// client.fail_next(ClientError::Timeout);
/// assert!(client.list(EntityKind::Author).await.is_err());
/// # });
/// ```
pub struct MockLibraryClient {
    tables: Mutex<Tables>,
    paused: watch::Sender<bool>,
}

impl MockLibraryClient {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            tables: Mutex::new(Tables::default()),
            paused,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a record directly, bypassing call recording. Returns it with its id.
    pub fn seed(&self, kind: EntityKind, fields: Value) -> Record {
        let mut tables = self.tables();
        let id = tables.assign_id();
        let fields = match fields {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        tables.table(kind).insert(id, fields.clone());
        Record { id, fields }
    }

    /// Make the next request fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: ClientError) {
        self.tables().failures.push_back(error);
    }

    /// Hold every request until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Release held requests.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Requests received so far, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.tables().calls.clone()
    }

    /// Current contents of a collection, ordered by id.
    #[must_use]
    pub fn records(&self, kind: EntityKind) -> Vec<Record> {
        self.tables()
            .table(kind)
            .iter()
            .map(|(id, fields)| Record {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }

    async fn perform<T, F>(&self, call: MockCall, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(&mut Tables) -> Result<T, ClientError>,
    {
        self.tables().calls.push(call);

        let mut paused = self.paused.subscribe();
        // `self.paused` outlives this future, so the channel stays open.
        let _ = paused.wait_for(|paused| !*paused).await;

        let mut tables = self.tables();
        if let Some(error) = tables.failures.pop_front() {
            return Err(error);
        }
        op(&mut tables)
    }
}

impl Default for MockLibraryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockLibraryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLibraryClient")
            .field("calls", &self.tables().calls.len())
            .field("paused", &*self.paused.borrow())
            .finish_non_exhaustive()
    }
}

impl LibraryClient for MockLibraryClient {
    fn list(&self, kind: EntityKind) -> ClientFuture<'_, Vec<Record>> {
        let call = MockCall { verb: "list", kind, id: None };
        Box::pin(self.perform(call, move |tables| {
            Ok(tables
                .table(kind)
                .iter()
                .map(|(id, fields)| Record {
                    id: *id,
                    fields: fields.clone(),
                })
                .collect())
        }))
    }

    fn get(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, Record> {
        let call = MockCall { verb: "get", kind, id: Some(id) };
        Box::pin(self.perform(call, move |tables| tables.fetch(kind, id)))
    }

    fn create(&self, kind: EntityKind, body: Value) -> ClientFuture<'_, Record> {
        let call = MockCall { verb: "create", kind, id: None };
        Box::pin(self.perform(call, move |tables| {
            let fields = object_body(body)?;
            let id = tables.assign_id();
            tables.table(kind).insert(id, fields.clone());
            Ok(Record { id, fields })
        }))
    }

    fn update(&self, kind: EntityKind, id: EntityId, body: Value) -> ClientFuture<'_, Record> {
        let call = MockCall { verb: "update", kind, id: Some(id) };
        Box::pin(self.perform(call, move |tables| {
            let fields = object_body(body)?;
            let row = tables.table(kind).get_mut(&id).ok_or_else(|| not_found(kind, id))?;
            row.extend(fields);
            Ok(Record {
                id,
                fields: row.clone(),
            })
        }))
    }

    fn delete(&self, kind: EntityKind, id: EntityId) -> ClientFuture<'_, ()> {
        let call = MockCall { verb: "delete", kind, id: Some(id) };
        Box::pin(self.perform(call, move |tables| {
            tables
                .table(kind)
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| not_found(kind, id))
        }))
    }

    fn return_loan(&self, id: EntityId) -> ClientFuture<'_, Record> {
        let kind = EntityKind::Loan;
        let call = MockCall { verb: "return", kind, id: Some(id) };
        Box::pin(self.perform(call, move |tables| {
            let row = tables.table(kind).get_mut(&id).ok_or_else(|| not_found(kind, id))?;
            if row.get("devuelto") == Some(&Value::Bool(true)) {
                return Err(ClientError::Status {
                    status: 409,
                    message: Some("Error: loan already returned".to_string()),
                });
            }
            row.insert("devuelto".to_string(), Value::Bool(true));
            Ok(Record {
                id,
                fields: row.clone(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the mock misbehaves
    async fn crud_round_trip() {
        let client = MockLibraryClient::new();

        let book = client
            .create(EntityKind::Book, json!({"titulo": "Rayuela", "autorId": 1}))
            .await
            .expect("create should succeed");
        let updated = client
            .update(EntityKind::Book, book.id, json!({"disponible": false}))
            .await
            .expect("update should succeed");
        assert_eq!(updated.field("titulo"), Some(&json!("Rayuela")));
        assert_eq!(updated.field("disponible"), Some(&json!(false)));

        client
            .delete(EntityKind::Book, book.id)
            .await
            .expect("delete should succeed");
        assert!(client.records(EntityKind::Book).is_empty());

        let verbs: Vec<_> = client.calls().iter().map(|c| c.verb).collect();
        assert_eq!(verbs, ["create", "update", "delete"]);
    }

    #[tokio::test]
    async fn missing_records_answer_not_found() {
        let client = MockLibraryClient::new();
        let error = client.get(EntityKind::User, EntityId::new(5)).await.err();
        assert_eq!(error.as_ref().and_then(ClientError::status), Some(404));
    }

    #[tokio::test]
    async fn loans_cannot_be_returned_twice() {
        let client = MockLibraryClient::new();
        let loan = client.seed(EntityKind::Loan, json!({"usuarioId": 1, "libroId": 2}));

        assert!(client.return_loan(loan.id).await.is_ok());
        let error = client.return_loan(loan.id).await.err();
        assert_eq!(error.as_ref().and_then(ClientError::status), Some(409));
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let client = MockLibraryClient::new();
        client.fail_next(ClientError::Timeout);

        assert_eq!(client.list(EntityKind::Author).await, Err(ClientError::Timeout));
        assert_eq!(client.list(EntityKind::Author).await, Ok(Vec::new()));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the held request never finishes
    async fn paused_requests_wait_for_resume() {
        let client = std::sync::Arc::new(MockLibraryClient::new());
        client.pause();

        let pending = {
            let client = std::sync::Arc::clone(&client);
            tokio::spawn(async move { client.list(EntityKind::Book).await })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        client.resume();
        let result = pending.await.expect("task should not panic");
        assert_eq!(result, Ok(Vec::new()));
    }
}

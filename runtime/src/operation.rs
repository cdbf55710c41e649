//! Subscribable handles for in-flight backend operations.
//!
//! An [`OperationHandle`] is returned as soon as an operation starts. The
//! caller attaches an [`Observer`] with up to three callbacks, or awaits
//! [`OperationHandle::into_result`] instead. Whatever the path, the outcome is
//! delivered exactly once: `on_next` or `on_error` first, then `on_complete`.
//!
//! ```text
//!            subscribe                      settle
//!  Pending ────────────▶ Observed ─────────────────────▶ Terminal
//!     │                                                    ▲
//!     │ settle              subscribe (delivers at once)   │
//!     └────────▶ Settled ──────────────────────────────────┘
//!
//!  Pending | Observed | Settled ──dispose──▶ Disposed
//! ```
//!
//! Disposal stops delivery but never aborts the network call itself.

use crate::error::ApiError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

type NextFn<T> = Box<dyn FnOnce(T) + Send>;
type ErrorFn = Box<dyn FnOnce(ApiError) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

/// Identifier of one operation, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The three callback slots attached to an operation.
///
/// Every slot is optional; an unset slot is skipped.
///
/// # Examples
///
/// ```
/// use biblioteca_sync_runtime::operation::Observer;
///
/// let observer: Observer<u32> = Observer::new()
///     .on_next(|count| println!("{count} books"))
///     .on_error(|error| eprintln!("{error}"))
///     .on_complete(|| println!("done"));
/// # drop(observer);
/// ```
pub struct Observer<T> {
    next: Option<NextFn<T>>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> Observer<T> {
    /// Observer with every slot empty.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: None,
            error: None,
            complete: None,
        }
    }

    /// Set the success callback.
    #[must_use]
    pub fn on_next<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.next = Some(Box::new(callback));
        self
    }

    /// Set the failure callback.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(ApiError) + Send + 'static,
    {
        self.error = Some(Box::new(callback));
        self
    }

    /// Set the terminal callback, run after `on_next` or `on_error`.
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.complete = Some(Box::new(callback));
        self
    }

    fn deliver(self, id: OperationId, outcome: Result<T, ApiError>) {
        let Self {
            next,
            error,
            complete,
        } = self;

        match outcome {
            Ok(value) => {
                if let Some(next) = next {
                    guarded(id, "on_next", move || next(value));
                }
            }
            Err(err) => {
                if let Some(error) = error {
                    guarded(id, "on_error", move || error(err));
                }
            }
        }

        if let Some(complete) = complete {
            guarded(id, "on_complete", complete);
        }
    }
}

impl<T> Default for Observer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("on_next", &self.next.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_complete", &self.complete.is_some())
            .finish()
    }
}

/// A panicking observer callback must not skip `on_complete`.
fn guarded(id: OperationId, slot: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::warn!(operation = %id, slot, "Observer callback panicked");
    }
}

enum Sink<T> {
    Observer(Observer<T>),
    Channel(oneshot::Sender<Result<T, ApiError>>),
}

impl<T> Sink<T> {
    fn deliver(self, id: OperationId, outcome: Result<T, ApiError>) {
        match self {
            Self::Observer(observer) => observer.deliver(id, outcome),
            Self::Channel(tx) => {
                // The awaiting side may have been cancelled.
                let _ = tx.send(outcome);
            }
        }
    }
}

enum Slot<T> {
    Pending,
    Observed(Sink<T>),
    Settled(Result<T, ApiError>),
    Terminal,
    Disposed,
}

struct Shared<T> {
    id: OperationId,
    slot: Mutex<Slot<T>>,
    done: watch::Sender<bool>,
}

impl<T> Shared<T> {
    fn slot(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, outcome: Result<T, ApiError>) {
        let sink = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Terminal) {
                Slot::Pending => {
                    *slot = Slot::Settled(outcome);
                    return;
                }
                Slot::Observed(sink) => sink,
                other => {
                    // Disposed, or already settled: nobody to tell.
                    *slot = other;
                    return;
                }
            }
        };

        sink.deliver(self.id, outcome);
        self.done.send_replace(true);
    }

    fn attach(&self, sink: Sink<T>) {
        let outcome = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Terminal) {
                Slot::Pending => {
                    *slot = Slot::Observed(sink);
                    return;
                }
                Slot::Settled(outcome) => outcome,
                other => {
                    *slot = other;
                    return;
                }
            }
        };

        sink.deliver(self.id, outcome);
        self.done.send_replace(true);
    }

    fn dispose(&self) -> bool {
        let previous = {
            let mut slot = self.slot();
            if matches!(*slot, Slot::Terminal | Slot::Disposed) {
                return false;
            }
            std::mem::replace(&mut *slot, Slot::Disposed)
        };

        // Observer closures are dropped outside the lock.
        drop(previous);
        self.done.send_replace(true);
        tracing::debug!(operation = %self.id, "Operation disposed");
        true
    }
}

/// Handle for one in-flight operation.
///
/// Dropping a handle that was never subscribed or awaited disposes it.
#[must_use = "an operation handle delivers nothing unless subscribed or awaited"]
pub struct OperationHandle<T> {
    id: OperationId,
    shared: Arc<Shared<T>>,
    consumed: bool,
}

impl<T> OperationHandle<T> {
    /// A fresh handle and the [`Settler`] that will complete it.
    pub fn pending() -> (Self, Settler<T>) {
        let id = OperationId::next();
        let (done, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            slot: Mutex::new(Slot::Pending),
            done,
        });

        let handle = Self {
            id,
            shared: Arc::clone(&shared),
            consumed: false,
        };
        (handle, Settler { shared: Some(shared) })
    }

    /// A handle that is already settled with `outcome`.
    pub fn ready(outcome: Result<T, ApiError>) -> Self {
        let (handle, settler) = Self::pending();
        settler.settle(outcome);
        handle
    }

    /// Operation identifier, also recorded on the operation's tracing span.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// Attach `observer`. If the outcome is already known it is delivered
    /// before this call returns.
    pub fn subscribe(mut self, observer: Observer<T>) -> OperationSubscription<T> {
        let shared = self.take_shared();
        shared.attach(Sink::Observer(observer));
        OperationSubscription { shared }
    }

    /// Wait for the outcome instead of using callbacks.
    ///
    /// # Errors
    ///
    /// Returns the normalized [`ApiError`] the operation failed with.
    pub async fn into_result(mut self) -> Result<T, ApiError> {
        let shared = self.take_shared();
        let (tx, rx) = oneshot::channel();
        shared.attach(Sink::Channel(tx));
        rx.await
            .unwrap_or_else(|_| Err(ApiError::aborted("operation ended without an outcome")))
    }

    /// Stop delivery without waiting for the outcome.
    pub fn dispose(mut self) {
        self.take_shared().dispose();
    }

    fn take_shared(&mut self) -> Arc<Shared<T>> {
        self.consumed = true;
        Arc::clone(&self.shared)
    }
}

impl<T> Drop for OperationHandle<T> {
    fn drop(&mut self) {
        if !self.consumed {
            self.shared.dispose();
        }
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Live attachment of an [`Observer`] to an operation.
///
/// Dropping it leaves the observer attached; call [`dispose`](Self::dispose)
/// to stop delivery.
pub struct OperationSubscription<T> {
    shared: Arc<Shared<T>>,
}

impl<T> OperationSubscription<T> {
    /// Operation this subscription observes.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.shared.id
    }

    /// Stop delivery. Returns `false` if the operation already finished or
    /// was disposed. Callbacks already running are not interrupted.
    pub fn dispose(&self) -> bool {
        self.shared.dispose()
    }

    /// Whether the observer has been completed or the operation disposed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.shared.done.borrow()
    }

    /// Resolve once [`is_done`](Self::is_done) becomes true.
    pub async fn done(&self) {
        let mut rx = self.shared.done.subscribe();
        // The sender lives in `self.shared`, so the channel cannot close here.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// [`done`](Self::done) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Elapsed` if the operation is still running after `timeout`.
    pub async fn wait_done_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.done()).await
    }
}

impl<T> fmt::Debug for OperationSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSubscription")
            .field("id", &self.shared.id)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Producer side of an [`OperationHandle`].
///
/// A settler dropped without settling (for example because its task
/// panicked) fails the operation with an aborted [`ApiError`].
pub struct Settler<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Settler<T> {
    /// Operation this settler completes.
    #[must_use]
    pub fn id(&self) -> Option<OperationId> {
        self.shared.as_ref().map(|shared| shared.id)
    }

    /// Whether the consumer disposed the handle. Settling is still allowed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| matches!(*shared.slot(), Slot::Disposed))
    }

    /// Deliver the outcome.
    pub fn settle(mut self, outcome: Result<T, ApiError>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(outcome);
        }
    }
}

impl<T> Drop for Settler<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            tracing::warn!(operation = %shared.id, "Operation dropped before settling");
            shared.settle(Err(ApiError::aborted("operation was interrupted")));
        }
    }
}

impl<T> fmt::Debug for Settler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    type Log = Arc<StdMutex<Vec<String>>>;

    fn logging_observer(log: &Log) -> Observer<u32> {
        let (next, error, complete) = (Arc::clone(log), Arc::clone(log), Arc::clone(log));
        Observer::new()
            .on_next(move |v| push(&next, format!("next:{v}")))
            .on_error(move |e| push(&error, format!("error:{}", e.message)))
            .on_complete(move || push(&complete, "complete".to_string()))
    }

    fn push(log: &Log, entry: String) {
        log.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[test]
    fn next_then_complete_on_success() {
        let log = Log::default();
        let (handle, settler) = OperationHandle::pending();
        let subscription = handle.subscribe(logging_observer(&log));

        assert!(!subscription.is_done());
        settler.settle(Ok(7));

        assert_eq!(entries(&log), ["next:7", "complete"]);
        assert!(subscription.is_done());
    }

    #[test]
    fn error_then_complete_on_failure() {
        let log = Log::default();
        let (handle, settler) = OperationHandle::pending();
        let _subscription = handle.subscribe(logging_observer(&log));

        settler.settle(Err(ApiError::network("Failed to load books", None)));

        assert_eq!(entries(&log), ["error:Failed to load books", "complete"]);
    }

    #[test]
    fn outcome_before_subscribe_is_delivered_on_subscribe() {
        let log = Log::default();
        let handle = OperationHandle::ready(Ok(3));
        assert!(entries(&log).is_empty());

        let subscription = handle.subscribe(logging_observer(&log));
        assert_eq!(entries(&log), ["next:3", "complete"]);
        assert!(subscription.is_done());
    }

    #[test]
    fn disposed_subscription_receives_nothing() {
        let log = Log::default();
        let (handle, settler) = OperationHandle::pending();
        let subscription = handle.subscribe(logging_observer(&log));

        assert!(subscription.dispose());
        assert!(!subscription.dispose());
        assert!(subscription.is_done());
        assert!(settler.is_disposed());
        settler.settle(Ok(1));

        assert!(entries(&log).is_empty());
    }

    #[test]
    fn dropping_unsubscribed_handle_disposes_it() {
        let (handle, settler) = OperationHandle::<u32>::pending();
        drop(handle);
        assert!(settler.is_disposed());
    }

    #[test]
    fn dispose_after_completion_is_a_no_op() {
        let log = Log::default();
        let (handle, settler) = OperationHandle::pending();
        let subscription = handle.subscribe(logging_observer(&log));
        settler.settle(Ok(5));

        assert!(!subscription.dispose());
        assert_eq!(entries(&log), ["next:5", "complete"]);
    }

    #[test]
    fn dropped_settler_aborts_operation() {
        let log = Log::default();
        let (handle, settler) = OperationHandle::pending();
        let _subscription = handle.subscribe(logging_observer(&log));

        drop(settler);

        assert_eq!(entries(&log), ["error:operation was interrupted", "complete"]);
    }

    #[test]
    #[allow(clippy::panic)] // Intentional panic for testing callback isolation
    fn panicking_next_still_completes() {
        let log = Log::default();
        let complete = Arc::clone(&log);
        let (handle, settler) = OperationHandle::pending();
        let _subscription = handle.subscribe(
            Observer::new()
                .on_next(|_: u32| panic!("page crashed"))
                .on_complete(move || push(&complete, "complete".to_string())),
        );

        settler.settle(Ok(1));

        assert_eq!(entries(&log), ["complete"]);
    }

    #[tokio::test]
    async fn into_result_resolves_with_outcome() {
        let (handle, settler) = OperationHandle::pending();
        tokio::spawn(async move { settler.settle(Ok(11_u32)) });
        assert_eq!(handle.into_result().await, Ok(11));

        let handle = OperationHandle::<u32>::ready(Err(ApiError::aborted("gone")));
        assert_eq!(handle.into_result().await.map_err(|e| e.message), Err("gone".to_string()));
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if completion never arrives
    async fn done_resolves_after_complete() {
        let (handle, settler) = OperationHandle::pending();
        let subscription = handle.subscribe(Observer::<u32>::new());

        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            settler.settle(Ok(2));
        });

        subscription
            .wait_done_with_timeout(Duration::from_secs(1))
            .await
            .expect("operation should complete");
        assert!(subscription.is_done());
        task.await.expect("settling task should not panic");
    }

    #[tokio::test]
    async fn done_times_out_while_pending() {
        let (handle, _settler) = OperationHandle::pending();
        let subscription = handle.subscribe(Observer::<u32>::new());

        let result = subscription
            .wait_done_with_timeout(Duration::from_millis(20))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn operation_ids_are_unique() {
        let (a, _sa) = OperationHandle::<()>::pending();
        let (b, _sb) = OperationHandle::<()>::pending();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("op-"));
    }
}

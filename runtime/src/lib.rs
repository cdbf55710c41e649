//! # Biblioteca Sync Runtime
//!
//! The async half of the sync layer: subscribable operation handles, the
//! reactive API wrapper, the metrics aggregator and the composition root.
//!
//! ## Core Components
//!
//! - **[`ReactiveApi`]**: runs backend calls and announces their outcome on the bus
//! - **[`OperationHandle`]**: `on_next` / `on_error` / `on_complete` for one call
//! - **[`MetricsAggregator`]**: `processed` / `errors` counters from the system channel
//! - **[`SyncRuntime`]**: wires config, client, bus, API and metrics together
//!
//! ## Example
//!
//! ```no_run
//! use biblioteca_sync_core::entity::EntityKind;
//! use biblioteca_sync_core::event::EventType;
//! use biblioteca_sync_runtime::config::SyncConfig;
//! use biblioteca_sync_runtime::operation::Observer;
//! use biblioteca_sync_runtime::SyncRuntime;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = SyncRuntime::from_config(SyncConfig::from_env()?)?;
//!
//! // Another page reloads whenever a book is created anywhere.
//! let api = runtime.api().clone();
//! let _reload = runtime
//!     .bus()
//!     .on(EventType::created(EntityKind::Book), move |_| {
//!         let _ = api.list(EntityKind::Book).subscribe(Observer::new());
//!     })
//!     .scoped();
//!
//! println!("{:?}", runtime.metrics().snapshot());
//! # Ok(())
//! # }
//! ```

use biblioteca_sync_client::{LibraryClient, RestClient};
use biblioteca_sync_core::event_bus::EventBus;
use biblioteca_sync_core::publisher::Publisher;
use std::sync::{Arc, LazyLock};

/// Subscribable CRUD operations
pub mod api;

/// Counters derived from the system channel
pub mod aggregator;

/// Environment-driven configuration
pub mod config;

/// Prometheus export of sync counters
pub mod metrics;

/// Operation handles and observers
pub mod operation;

pub use aggregator::{MetricsAggregator, MetricsSnapshot};
pub use api::ReactiveApi;
pub use error::{ApiError, ApiErrorKind, RuntimeError};
pub use operation::{Observer, OperationHandle, OperationId, OperationSubscription};

/// Error types for the sync runtime
pub mod error {
    use biblioteca_sync_client::ClientError;
    use thiserror::Error;

    /// Broad category of an [`ApiError`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ApiErrorKind {
        /// The backend rejected the call, or it failed or timed out in transit
        NetworkFailure,
        /// The request could not be built
        InvalidRequest,
        /// The operation ended without reaching the backend's answer
        Aborted,
    }

    /// Normalized failure delivered through `on_error`.
    ///
    /// `message` is always human-readable: the backend's own message when it
    /// sent one, otherwise a generic description of the operation.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{message}")]
    pub struct ApiError {
        /// Category
        pub kind: ApiErrorKind,
        /// Human-readable message
        pub message: String,
        /// HTTP status, if the backend answered
        pub status: Option<u16>,
    }

    impl ApiError {
        /// A failed or rejected network call.
        #[must_use]
        pub fn network(message: impl Into<String>, status: Option<u16>) -> Self {
            Self {
                kind: ApiErrorKind::NetworkFailure,
                message: message.into(),
                status,
            }
        }

        /// A request that could not be built.
        #[must_use]
        pub fn invalid_request(message: impl Into<String>) -> Self {
            Self {
                kind: ApiErrorKind::InvalidRequest,
                message: message.into(),
                status: None,
            }
        }

        /// An operation that was interrupted before settling.
        #[must_use]
        pub fn aborted(message: impl Into<String>) -> Self {
            Self {
                kind: ApiErrorKind::Aborted,
                message: message.into(),
                status: None,
            }
        }

        /// Normalize a client failure, using `fallback` when the backend
        /// supplied no message.
        #[must_use]
        pub fn from_client(error: &ClientError, fallback: impl Into<String>) -> Self {
            let message = error
                .backend_message()
                .map_or_else(|| fallback.into(), ToString::to_string);

            match error {
                ClientError::InvalidRequest(_) => Self::invalid_request(message),
                _ => Self::network(message, error.status()),
            }
        }

        /// Whether this is a [`ApiErrorKind::NetworkFailure`].
        #[must_use]
        pub fn is_network_failure(&self) -> bool {
            self.kind == ApiErrorKind::NetworkFailure
        }
    }

    /// Errors that can occur while assembling a [`SyncRuntime`](crate::SyncRuntime)
    #[derive(Error, Debug)]
    pub enum RuntimeError {
        /// Configuration could not be loaded or is invalid
        #[error(transparent)]
        Config(#[from] crate::config::ConfigError),

        /// The HTTP client could not be built
        #[error(transparent)]
        Client(#[from] ClientError),

        /// The metrics exporter could not be installed
        #[error(transparent)]
        Metrics(#[from] crate::metrics::MetricsError),
    }
}

static DEFAULT_BUS: LazyLock<EventBus> = LazyLock::new(EventBus::new);

/// The process-wide bus used by [`SyncRuntime::from_config`].
///
/// Library code should take a bus parameter instead; this exists for the
/// composition root only.
#[must_use]
pub fn default_bus() -> EventBus {
    DEFAULT_BUS.clone()
}

/// Everything a page needs, wired together once.
#[derive(Debug)]
pub struct SyncRuntime {
    config: config::SyncConfig,
    api: ReactiveApi,
    publisher: Publisher,
    metrics: MetricsAggregator,
    metrics_server: Option<metrics::MetricsServer>,
}

impl SyncRuntime {
    /// Build a runtime on the [`default_bus`] talking to the configured backend.
    ///
    /// Installs the Prometheus recorder when `metrics_addr` is set.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the HTTP client cannot
    /// be built, or the metrics recorder cannot be installed.
    pub fn from_config(config: config::SyncConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let client = RestClient::new(config.api_url.clone(), config.request_timeout())?;

        let metrics_server = match config.metrics_addr {
            Some(addr) => {
                let mut server = metrics::MetricsServer::new(addr);
                server.start()?;
                Some(server)
            }
            None => None,
        };

        let mut runtime = Self::with_client(Arc::new(client), &default_bus());
        runtime.config = config;
        runtime.metrics_server = metrics_server;

        tracing::info!(api_url = %runtime.config.api_url, "Sync runtime ready");
        Ok(runtime)
    }

    /// Build a runtime around an explicit client and bus.
    #[must_use]
    pub fn with_client(client: Arc<dyn LibraryClient>, bus: &EventBus) -> Self {
        Self {
            config: config::SyncConfig::default(),
            api: ReactiveApi::new(client, bus),
            publisher: Publisher::new(bus),
            metrics: MetricsAggregator::attach(bus),
            metrics_server: None,
        }
    }

    /// The bus pages subscribe to.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        self.publisher.bus()
    }

    /// Reactive CRUD operations.
    #[must_use]
    pub const fn api(&self) -> &ReactiveApi {
        &self.api
    }

    /// Facade for system events.
    #[must_use]
    pub const fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Process-lifetime counters.
    #[must_use]
    pub const fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    /// Configuration the runtime was built from.
    #[must_use]
    pub const fn config(&self) -> &config::SyncConfig {
        &self.config
    }

    /// Prometheus scrape text, if export is enabled.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        metrics::BusMetrics::record_totals(self.bus());
        self.metrics_server
            .as_ref()
            .and_then(metrics::MetricsServer::render)
    }
}

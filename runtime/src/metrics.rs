//! Prometheus export of sync-layer counters.
//!
//! These counters are ambient observability, separate from the in-process
//! [`MetricsSnapshot`](crate::aggregator::MetricsSnapshot) that pages read.
//!
//! # Example
//!
//! ```rust,no_run
//! use biblioteca_sync_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use biblioteca_sync_core::entity::EntityKind;
use biblioteca_sync_core::event_bus::EventBus;
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::counter;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and renders the scrape text on demand.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Listen address this server was configured with.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::Install` if the recorder cannot be installed for
    /// a reason other than one already being present.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. A second call (common
    /// in tests) logs a warning and leaves [`handle`](Self::handle) empty.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                tracing::info!(
                    addr = %self.addr,
                    "Metrics recorder installed - scrape at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn register_metrics() {
    describe_counter!(
        "sync_events_emitted_total",
        "Total number of events emitted on the sync bus"
    );
    describe_counter!(
        "sync_subscriber_failures_total",
        "Total number of bus subscriber callbacks that failed or panicked"
    );
    describe_counter!(
        "sync_operations_total",
        "Total number of reactive API operations by verb, kind and outcome"
    );
    describe_counter!(
        "sync_system_events_processed_total",
        "Total number of info system events seen by the metrics aggregator"
    );
    describe_counter!(
        "sync_system_events_errors_total",
        "Total number of error system events seen by the metrics aggregator"
    );
}

/// Bus counters recorder.
pub struct BusMetrics;

impl BusMetrics {
    /// Publish the bus's running totals.
    pub fn record_totals(bus: &EventBus) {
        counter!("sync_events_emitted_total").absolute(bus.emitted_count());
        counter!("sync_subscriber_failures_total").absolute(bus.subscriber_failure_count());
    }
}

/// Outcome label for [`OperationMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend call succeeded
    Success,
    /// The backend call failed
    Failure,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Reactive operation recorder.
pub struct OperationMetrics;

impl OperationMetrics {
    /// Record a finished operation.
    pub fn record(verb: &'static str, kind: EntityKind, outcome: Outcome) {
        counter!(
            "sync_operations_total",
            "verb" => verb,
            "kind" => kind.label(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }
}

/// System-channel recorder used by the aggregator.
pub struct SystemEventMetrics;

impl SystemEventMetrics {
    /// Record an info system event.
    pub fn record_processed() {
        counter!("sync_system_events_processed_total").increment(1);
    }

    /// Record an error system event.
    pub fn record_error() {
        counter!("sync_system_events_errors_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biblioteca_sync_core::event::{Event, SystemEvent};

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the address does not parse
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().expect("valid address"));
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if the recorder cannot start
    fn recorded_counters_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().expect("valid address"));
        server.start().expect("recorder should install or already exist");

        let bus = EventBus::new();
        bus.emit(Event::system(SystemEvent::info("ping"), bus.now()));
        BusMetrics::record_totals(&bus);
        OperationMetrics::record("create", EntityKind::Book, Outcome::Success);
        SystemEventMetrics::record_processed();

        // Another test may own the global recorder; metrics still record.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("sync_events_emitted_total"));
            assert!(rendered.contains("sync_operations_total"));
            assert!(rendered.contains("sync_system_events_processed_total"));
        }
    }
}

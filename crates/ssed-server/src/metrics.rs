//! Metrics collection and export for ssed.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use ssed_core::BrokerStats;
use ssed_transport::{CloseReason, HandlerError};
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ssed_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ssed_connections_active";
    pub const SUBSCRIBERS: &str = "ssed_subscribers";
    pub const MESSAGES_PUBLISHED: &str = "ssed_messages_published_total";
    pub const DELIVERIES_TOTAL: &str = "ssed_deliveries_total";
    pub const MESSAGES_DROPPED: &str = "ssed_messages_dropped_total";
    pub const SUBSCRIBERS_EVICTED: &str = "ssed_subscribers_evicted_total";
    pub const SESSIONS_CLOSED: &str = "ssed_sessions_closed_total";
    pub const ERRORS_TOTAL: &str = "ssed_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of event stream connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of streaming connections"
    );
    metrics::describe_gauge!(names::SUBSCRIBERS, "Current number of registered subscribers");
    metrics::describe_counter!(names::MESSAGES_PUBLISHED, "Total number of messages broadcast");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of messages queued to subscribers"
    );
    metrics::describe_counter!(
        names::MESSAGES_DROPPED,
        "Messages skipped for subscribers whose queue was full"
    );
    metrics::describe_counter!(
        names::SUBSCRIBERS_EVICTED,
        "Subscribers disconnected for falling behind"
    );
    metrics::describe_counter!(names::SESSIONS_CLOSED, "Sessions closed, by reason");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new streaming connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a closed streaming connection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record how a session ended.
pub fn record_session_end(result: &Result<CloseReason, HandlerError>) {
    let reason = match result {
        Ok(CloseReason::Disconnected) => "disconnected",
        Ok(CloseReason::Evicted) => "evicted",
        Ok(CloseReason::Shutdown) => "shutdown",
        Err(e) => {
            record_error(error_kind(e));
            "error"
        }
    };
    counter!(names::SESSIONS_CLOSED, "reason" => reason).increment(1);
}

/// Label for a handler error.
#[must_use]
pub fn error_kind(error: &HandlerError) -> &'static str {
    match error {
        HandlerError::TransportUnsupported => "transport_unsupported",
        HandlerError::WriteFailure(_) => "write_failure",
    }
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Mirror a broker stats snapshot into the registry.
pub fn record_broker_stats(stats: &BrokerStats) {
    gauge!(names::SUBSCRIBERS).set(stats.subscribers as f64);
    counter!(names::MESSAGES_PUBLISHED).absolute(stats.published);
    counter!(names::DELIVERIES_TOTAL).absolute(stats.delivered);
    counter!(names::MESSAGES_DROPPED).absolute(stats.dropped);
    counter!(names::SUBSCRIBERS_EVICTED).absolute(stats.evicted);
}

/// Follow broker stats until the broker stops.
pub fn spawn_stats_reporter(mut stats: watch::Receiver<BrokerStats>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = *stats.borrow_and_update();
            record_broker_stats(&snapshot);
            if stats.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssed_core::{Broker, BrokerConfig};

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_session_end_labels() {
        record_session_end(&Ok(CloseReason::Evicted));
        record_session_end(&Err(HandlerError::TransportUnsupported));
        assert_eq!(
            error_kind(&HandlerError::TransportUnsupported),
            "transport_unsupported"
        );
    }

    #[tokio::test]
    async fn test_stats_reporter_stops_with_broker() {
        let broker = Broker::spawn(BrokerConfig::default());
        let reporter = spawn_stats_reporter(broker.watch_stats());

        broker.publish("tick").await.unwrap();
        drop(broker);

        tokio::time::timeout(std::time::Duration::from_secs(1), reporter)
            .await
            .unwrap()
            .unwrap();
    }
}

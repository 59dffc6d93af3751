//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use relay_pubsub::metrics::{
    RELAY_DECODE_FAILURES_TOTAL, RELAY_DISPATCH_TOTAL, RELAY_HANDLERS,
    RELAY_PUBLISH_FAILURES_TOTAL, RELAY_PUBLISH_RETRIES_TOTAL, RELAY_PUBLISH_TOTAL,
};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshakes refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Frames queued to a tutor socket (counter).
pub const DELIVERIES_TOTAL: &str = "tutor_deliveries_total";
/// Frames dropped because the socket queue was full or closed (counter).
pub const DELIVERY_DROPS_TOTAL: &str = "tutor_delivery_drops_total";
/// Forced disconnects carried out (counter).
pub const FORCED_DISCONNECTS_TOTAL: &str = "forced_disconnects_total";
/// Forced disconnects aborted because the final push failed (counter).
pub const FORCED_DISCONNECTS_ABORTED_TOTAL: &str = "forced_disconnects_aborted_total";
/// Control-plane requests (counter, labels: route, status).
pub const CONTROL_REQUESTS_TOTAL: &str = "control_requests_total";

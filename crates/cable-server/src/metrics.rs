//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection authentication failures total (counter).
pub const WS_AUTH_FAILURES_TOTAL: &str = "ws_auth_failures_total";
/// Upgrade requests rejected by the origin allow-list (counter).
pub const WS_ORIGIN_REJECTS_TOTAL: &str = "ws_origin_rejects_total";
/// Channels currently registered with the hub (gauge).
pub const HUB_CHANNELS_ACTIVE: &str = "hub_channels_active";
/// Broadcast payloads accepted by the hub (counter, labels: target).
pub const HUB_BROADCASTS_TOTAL: &str = "hub_broadcasts_total";
/// Per-channel delivery failures during broadcast (counter).
pub const HUB_DELIVERY_FAILURES_TOTAL: &str = "hub_delivery_failures_total";
/// Channel evictions triggered by failed delivery (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "hub_evictions_total";
/// Periodic re-validation failures (counter).
pub const CHANNEL_REVALIDATION_FAILURES_TOTAL: &str = "channel_revalidation_failures_total";

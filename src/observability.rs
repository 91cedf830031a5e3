use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "roost_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "roost_request_duration_seconds";

/// Counter: booking attempts by result. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "roost_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roost_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roost_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roost_connections_rejected_total";

/// Gauge: listings currently in the catalog.
pub const LISTINGS_ACTIVE: &str = "roost_listings_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roost_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roost_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roost_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Search { .. } => "search",
        Request::GetListing { .. } => "get_listing",
        Request::CreateListing { .. } => "create_listing",
        Request::UpdateListing { .. } => "update_listing",
        Request::DeleteListing { .. } => "delete_listing",
        Request::Book { .. } => "book",
        Request::CancelReservation { .. } => "cancel_reservation",
        Request::ListReservations { .. } => "list_reservations",
        Request::Calendar { .. } => "calendar",
    }
}

use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests served. Labels: method, route, status.
pub const REQUESTS_TOTAL: &str = "fleetwire_requests_total";

/// Histogram: request latency in seconds. Labels: method, route.
pub const REQUEST_DURATION_SECONDS: &str = "fleetwire_request_duration_seconds";

/// Counter: engine-level rejections. Label: kind.
pub const REJECTIONS_TOTAL: &str = "fleetwire_rejections_total";

/// Counter: missing/invalid/revoked token presentations.
pub const AUTH_FAILURES_TOTAL: &str = "fleetwire_auth_failures_total";

/// Counter: tokens added to the revocation store.
pub const TOKENS_REVOKED_TOTAL: &str = "fleetwire_tokens_revoked_total";

// ── WAL metrics ─────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetwire_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetwire_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

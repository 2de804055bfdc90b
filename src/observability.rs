use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings confirmed.
pub const BOOKINGS_TOTAL: &str = "diveops_bookings_total";

/// Counter: booking attempts rejected. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "diveops_bookings_rejected_total";

/// Counter: eligibility evaluations returning ineligible.
pub const ELIGIBILITY_DENIED_TOTAL: &str = "diveops_eligibility_denied_total";

/// Counter: participation status transitions applied.
pub const PARTICIPATION_TRANSITIONS_TOTAL: &str = "diveops_participation_transitions_total";

/// Counter: settlements posted to the ledger.
pub const SETTLEMENTS_POSTED_TOTAL: &str = "diveops_settlements_posted_total";

/// Counter: settlement calls resolved idempotently to an existing record.
pub const SETTLEMENT_REPLAYS_TOTAL: &str = "diveops_settlement_replays_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: scheduled trips currently live (not completed/cancelled).
pub const TRIPS_ACTIVE: &str = "diveops_trips_active";

/// Counter: trip-lock acquisitions that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "diveops_lock_timeouts_total";

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().compact().try_init();
}

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

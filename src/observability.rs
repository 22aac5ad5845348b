use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: availability checks run by the flow. Labels: outcome.
pub const AVAILABILITY_CHECKS_TOTAL: &str = "frontdesk_availability_checks_total";

/// Histogram: room + reservation snapshot fetch latency in seconds.
pub const SNAPSHOT_FETCH_DURATION_SECONDS: &str = "frontdesk_snapshot_fetch_duration_seconds";

/// Counter: flow state transitions. Labels: to.
pub const FLOW_TRANSITIONS_TOTAL: &str = "frontdesk_flow_transitions_total";

/// Counter: payment provider outcomes. Labels: outcome.
pub const PAYMENT_OUTCOMES_TOTAL: &str = "frontdesk_payment_outcomes_total";

/// Counter: reservations rejected by the backend after payment capture.
pub const PERSISTENCE_CONFLICTS_TOTAL: &str = "frontdesk_persistence_conflicts_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Gauge: unresolved reconciliation tickets.
pub const RECONCILIATIONS_PENDING: &str = "frontdesk_reconciliations_pending";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "frontdesk_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (entries per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "frontdesk_journal_flush_batch_size";

/// Counter: journal compactions. Labels: status.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "frontdesk_journal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomcal_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomcal_query_duration_seconds";

/// Counter: calendar events processed. Labels: outcome.
pub const CALENDAR_EVENTS_TOTAL: &str = "roomcal_calendar_events_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomcal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomcal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomcal_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "roomcal_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomcal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (log entries per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomcal_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUnit { .. } => "insert_unit",
        Command::DeleteUnit { .. } => "delete_unit",
        Command::SelectUnits => "select_units",
        Command::SelectUnit { .. } => "select_unit",
        Command::InsertEvents { .. } => "insert_events",
        Command::DeleteEvents { .. } => "delete_events",
        Command::InsertLock { .. } => "insert_lock",
        Command::DeleteLock { .. } => "delete_lock",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectEvents { .. } => "select_events",
        Command::SelectStates { .. } => "select_states",
        Command::SelectAvailability { .. } => "select_availability",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn labels_are_snake_case() {
        let cmd = crate::sql::parse_sql("SELECT * FROM units").unwrap();
        assert_eq!(command_label(&cmd), "select_units");
    }
}

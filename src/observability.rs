use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "billboard_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "billboard_command_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "billboard_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "billboard_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "billboard_connections_rejected_total";

/// Histogram: full-table flush duration in seconds.
pub const FLUSH_DURATION_SECONDS: &str = "billboard_flush_duration_seconds";

/// Counter: flushes that failed and left the ledger out of sync.
pub const FLUSH_FAILURES_TOTAL: &str = "billboard_flush_failures_total";

// ── Ledger state ────────────────────────────────────────────────

/// Gauge: slots holding a booking.
pub const SLOTS_OCCUPIED: &str = "billboard_slots_occupied";

/// Gauge: entries in the archive.
pub const ARCHIVE_ENTRIES: &str = "billboard_archive_entries";

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
        Command::SelectActive => "select_active",
        Command::SelectArchive => "select_archive",
        Command::SelectSummary => "select_summary",
        Command::SelectFirstEmpty => "select_first_empty",
        Command::SelectReport { .. } => "select_report",
        Command::SelectContract { .. } => "select_contract",
        Command::QuickAdd { .. } => "quick_add",
        Command::ApplyEdits { .. } => "apply_edits",
        Command::ClearSlots { .. } => "clear_slots",
        Command::Archive { .. } => "archive",
        Command::ClearArchive => "clear_archive",
        Command::Undo { .. } => "undo",
        Command::Save => "save",
        Command::Reload => "reload",
        Command::Reset => "reset",
    }
}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "concierge_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "concierge_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: bookings admitted.
pub const BOOKINGS_CREATED_TOTAL: &str = "concierge_bookings_created_total";

/// Counter: booking requests rejected because the room was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "concierge_booking_conflicts_total";

/// Counter: lifecycle transitions applied. Labels: action.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "concierge_booking_transitions_total";

/// Counter: administrative revisions and deletions. Labels: action.
pub const ADMIN_OVERRIDES_TOTAL: &str = "concierge_admin_overrides_total";

/// Counter: grant windows rejected for escaping the stay.
pub const GRANTS_OUT_OF_RANGE_TOTAL: &str = "concierge_grants_out_of_range_total";

/// Counter: room automation writes. Labels: field.
pub const CONTROL_UPDATES_TOTAL: &str = "concierge_control_updates_total";

/// Gauge: registered rooms.
pub const ROOMS_REGISTERED: &str = "concierge_rooms_registered";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "concierge_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "concierge_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "concierge_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "concierge_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "concierge_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "concierge_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "concierge_wal_compactions_total";

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
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoomStatus { .. } => "update_room_status",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertBooking(_) => "insert_booking",
        Command::TransitionBooking { .. } => "transition_booking",
        Command::ReviseBooking { .. } => "revise_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertGuestAccess(_) => "insert_guest_access",
        Command::SetAccessActive { .. } => "set_access_active",
        Command::ReviseGuestAccess { .. } => "revise_guest_access",
        Command::DeleteGuestAccess { .. } => "delete_guest_access",
        Command::InsertAlarm(_) => "insert_alarm",
        Command::SetAlarmActive { .. } => "set_alarm_active",
        Command::ReviseAlarm { .. } => "revise_alarm",
        Command::DeleteAlarm { .. } => "delete_alarm",
        Command::UpdateRoomControls { .. } => "update_room_controls",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectBookings(_) => "select_bookings",
        Command::SelectGuestAccess(_) => "select_guest_access",
        Command::SelectAlarms(_) => "select_alarms",
        Command::SelectRoomControls { .. } => "select_room_controls",
        Command::SelectAvailability { .. } => "select_availability",
    }
}

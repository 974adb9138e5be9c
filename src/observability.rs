use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Gauge: number of loaded properties (tenants).
pub const TENANTS_ACTIVE: &str = "innkeep_tenants_active";

/// Counter: failed staff logins.
pub const AUTH_FAILURES_TOTAL: &str = "innkeep_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "innkeep_reservations_created_total";

/// Counter: writes refused because the room was already taken.
pub const DOUBLE_BOOKINGS_REJECTED_TOTAL: &str = "innkeep_double_bookings_rejected_total";

/// Counter: confirmations delivered.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "innkeep_notifications_sent_total";

/// Counter: confirmations abandoned after the last retry.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "innkeep_notifications_failed_total";

/// Counter: confirmations dropped because the delivery queue was full or closed.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "innkeep_notifications_dropped_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom(_) => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertReservation(_) => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservation { .. } | Command::SelectReservations(_) => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRoomCalendar { .. } => "select_room_calendar",
        Command::SelectConflict { .. } => "select_conflicts",
        Command::SelectQuote { .. } => "select_quotes",
        Command::InsertEvent(_) => "insert_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::SelectEvents => "select_events",
        Command::InsertCategory { .. } => "insert_category",
        Command::SelectCategories => "select_categories",
        Command::InsertMenuItem(_) => "insert_menu_item",
        Command::UpdateMenuItem { .. } => "update_menu_item",
        Command::DeleteMenuItem { .. } => "delete_menu_item",
        Command::SelectMenuItems { .. } => "select_menu_items",
        Command::InsertUser(_) => "insert_user",
        Command::SelectUsers => "select_users",
        Command::Login { .. } => "login",
        Command::SelectPaymentConfig => "select_payment_config",
        Command::UpdatePaymentConfig(_) => "update_payment_config",
    }
}

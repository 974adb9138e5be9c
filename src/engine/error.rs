use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `start >= end`.
    InvalidRange { start: Ms, end: Ms },
    /// Fewer than one night.
    InvalidStay { start: Ms, end: Ms },
    RoomNotFound(Ulid),
    ReservationNotFound(Ulid),
    /// Any other record kind (event, menu item, category, user).
    NotFound(&'static str, Ulid),
    /// Overlaps an active reservation on the same room.
    DoubleBooking { room_id: Ulid, conflicting: Ulid },
    Validation(String),
    /// Store-level uniqueness violation (room number, category name, username, phone).
    Conflict(String),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    RoomInUse(Ulid),
    Unauthorized,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} must be before end {end}")
            }
            EngineError::InvalidStay { start, end } => {
                write!(f, "invalid stay [{start}, {end}): at least one night required")
            }
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::DoubleBooking {
                room_id,
                conflicting,
            } => write!(
                f,
                "room {room_id} is already booked for these dates (reservation {conflicting})"
            ),
            EngineError::Validation(msg) => write!(f, "validation error: {msg}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::InvalidTransition { from, to } => write!(
                f,
                "invalid status transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            EngineError::RoomInUse(id) => {
                write!(f, "cannot delete room {id}: has active reservations")
            }
            EngineError::Unauthorized => write!(f, "invalid username or password"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

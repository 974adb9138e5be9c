use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Order first, then bounds. Every operation taking a range goes through here.
pub(crate) fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::InvalidRange { start, end });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

/// Stays are additionally capped in length.
pub(crate) fn checked_stay(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = checked_span(start, end)?;
    if span.duration_ms() > MAX_STAY_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

/// Any active reservation on `rs` overlapping `span`, other than `exclude`.
pub fn has_conflict(rs: &RoomState, span: &Span, exclude: Option<Ulid>) -> bool {
    rs.active_overlapping(span, exclude).next().is_some()
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match rs.active_overlapping(span, exclude).next() {
        Some(existing) => Err(EngineError::DoubleBooking {
            room_id: rs.id(),
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}

impl Engine {
    /// Read-only: would `[start, end)` collide with an active reservation of the room?
    pub async fn has_conflict(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        exclude_reservation_id: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = checked_span(start, end)?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(has_conflict(&guard, &span, exclude_reservation_id))
    }
}

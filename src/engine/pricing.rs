use ulid::Ulid;

use crate::model::*;

use super::conflict::checked_span;
use super::{Engine, EngineError};

/// Whole nights in `span`, rounding partial days up. Less than one full day is not a stay.
pub fn nights_between(span: &Span) -> Result<i64, EngineError> {
    let duration = span.duration_ms();
    if duration < DAY_MS {
        return Err(EngineError::InvalidStay {
            start: span.start,
            end: span.end,
        });
    }
    Ok((duration + DAY_MS - 1) / DAY_MS)
}

pub fn quote(room: &Room, span: &Span) -> Result<Quote, EngineError> {
    let nights = nights_between(span)?;
    let total = room
        .nightly_rate
        .checked_mul(nights)
        .ok_or(EngineError::LimitExceeded("price overflow"))?;
    Ok(Quote {
        room_id: room.id,
        nights,
        nightly_rate: room.nightly_rate,
        total,
    })
}

impl Engine {
    pub async fn compute_price(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<Quote, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let span = checked_span(start, end)?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(room_id));
        }
        quote(&guard.room, &span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn room(rate: Cents) -> Room {
        Room {
            id: Ulid::new(),
            number: 12,
            kind: "Double".into(),
            nightly_rate: rate,
            images: vec![],
        }
    }

    #[test]
    fn whole_nights() {
        assert_eq!(nights_between(&Span::new(0, DAY_MS)), Ok(1));
        assert_eq!(nights_between(&Span::new(0, 3 * DAY_MS)), Ok(3));
    }

    #[test]
    fn partial_day_rounds_up() {
        assert_eq!(nights_between(&Span::new(0, DAY_MS + H)), Ok(2));
        assert_eq!(nights_between(&Span::new(14 * H, 14 * H + 2 * DAY_MS + 1)), Ok(3));
    }

    #[test]
    fn under_a_day_is_not_a_stay() {
        assert_eq!(
            nights_between(&Span::new(0, 23 * H)),
            Err(EngineError::InvalidStay { start: 0, end: 23 * H })
        );
    }

    #[test]
    fn quote_multiplies_rate() {
        let r = room(50_000);
        let q = quote(&r, &Span::new(0, 3 * DAY_MS)).unwrap();
        assert_eq!(q.nights, 3);
        assert_eq!(q.nightly_rate, 50_000);
        assert_eq!(q.total, 150_000);
        assert_eq!(q.room_id, r.id);
    }

    #[test]
    fn free_room_costs_nothing() {
        let q = quote(&room(0), &Span::new(0, 2 * DAY_MS)).unwrap();
        assert_eq!(q.total, 0);
    }

    #[test]
    fn overflow_is_reported() {
        let err = quote(&room(i64::MAX), &Span::new(0, 2 * DAY_MS)).unwrap_err();
        assert_eq!(err, EngineError::LimitExceeded("price overflow"));
    }
}

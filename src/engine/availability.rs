use std::collections::HashSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::checked_span;
use super::{Engine, EngineError};

/// No active reservation of `rs` touches `query`.
pub fn room_is_free(rs: &RoomState, query: &Span) -> bool {
    rs.active_overlapping(query, None).next().is_none()
}

/// Free windows of one room inside `query`: the query minus every active stay.
pub fn free_windows(rs: &RoomState, query: &Span) -> Vec<Span> {
    let mut busy: Vec<Span> = rs
        .active_overlapping(query, None)
        .map(|r| Span::new(r.span.start.max(query.start), r.span.end.min(query.end)))
        .collect();
    if busy.is_empty() {
        return vec![*query];
    }
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[*query], &busy)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut first = 0;

    for &b in base {
        let mut cursor = b.start;

        while first < to_remove.len() && to_remove[first].end <= cursor {
            first += 1;
        }

        for r in to_remove[first..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }

        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

impl Engine {
    /// Rooms with no active reservation overlapping `[start, end)`, sorted by number.
    pub async fn available_rooms(&self, start: Ms, end: Ms) -> Result<Vec<Room>, EngineError> {
        let query = checked_span(start, end)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }

        let snapshot: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut busy: HashSet<Ulid> = HashSet::new();
        let mut all = Vec::with_capacity(snapshot.len());
        for rs in snapshot {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            if !room_is_free(&guard, &query) {
                busy.insert(guard.id());
            }
            all.push(guard.room.clone());
        }

        let mut free: Vec<Room> = all.into_iter().filter(|r| !busy.contains(&r.id)).collect();
        free.sort_by_key(|r| r.number);
        Ok(free)
    }

    /// Bookable windows of one room inside `[start, end)`.
    pub async fn room_calendar(&self, room_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Span>, EngineError> {
        let query = checked_span(start, end)?;
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(room_id));
        }
        Ok(free_windows(&guard, &query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D: Ms = DAY_MS;

    fn state(stays: &[(Ms, Ms, BookingStatus)]) -> RoomState {
        let mut rs = RoomState::new(Room {
            id: Ulid::new(),
            number: 3,
            kind: "Suite".into(),
            nightly_rate: 1,
            images: vec![],
        });
        for &(start, end, status) in stays {
            rs.insert_reservation(Reservation {
                id: Ulid::new(),
                room_id: rs.id(),
                user_id: None,
                guest_name: None,
                guest_email: None,
                guest_phone: None,
                span: Span::new(start, end),
                status,
                total_price: 0,
                payment_method: PaymentMethod::Transfer,
                created_at: 0,
            });
        }
        rs
    }

    #[test]
    fn merge_joins_adjacent_and_nested() {
        let merged = merge_overlapping(&[
            Span::new(0, 10),
            Span::new(5, 8),
            Span::new(10, 20),
            Span::new(30, 40),
        ]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);
    }

    #[test]
    fn subtract_cuts_holes() {
        let base = [Span::new(0, 100), Span::new(200, 300)];
        let remove = [Span::new(10, 20), Span::new(90, 210), Span::new(250, 260)];
        assert_eq!(
            subtract_intervals(&base, &remove),
            vec![
                Span::new(0, 10),
                Span::new(20, 90),
                Span::new(210, 250),
                Span::new(260, 300),
            ]
        );
    }

    #[test]
    fn subtract_everything_leaves_nothing() {
        assert!(subtract_intervals(&[Span::new(5, 10)], &[Span::new(0, 20)]).is_empty());
    }

    #[test]
    fn free_windows_skip_cancelled() {
        let rs = state(&[
            (D, 3 * D, BookingStatus::Confirmed),
            (4 * D, 5 * D, BookingStatus::Cancelled),
            (6 * D, 12 * D, BookingStatus::Pending),
        ]);
        assert_eq!(
            free_windows(&rs, &Span::new(0, 10 * D)),
            vec![Span::new(0, D), Span::new(3 * D, 6 * D)]
        );
    }

    #[test]
    fn empty_room_is_one_window() {
        let rs = state(&[]);
        assert_eq!(free_windows(&rs, &Span::new(D, 2 * D)), vec![Span::new(D, 2 * D)]);
        assert!(room_is_free(&rs, &Span::new(0, D)));
    }

    #[test]
    fn checkout_day_is_free_for_checkin() {
        let rs = state(&[(D, 3 * D, BookingStatus::Confirmed)]);
        assert!(room_is_free(&rs, &Span::new(3 * D, 4 * D)));
        assert!(!room_is_free(&rs, &Span::new(2 * D, 4 * D)));
    }
}

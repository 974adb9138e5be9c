use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Calendar window a reservation's start must fall in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Period {
    /// Monday 00:00 through Sunday 23:59:59.999 of the current week.
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "week" => Some(Period::Week),
            "month" => Some(Period::Month),
            "year" => Some(Period::Year),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Week => "week",
            Period::Month => "month",
            Period::Year => "year",
            Period::All => "all",
        }
    }

    /// `[first instant, first instant of the next period)` around `now`, UTC.
    pub fn window_at(self, now: Ms) -> Option<Span> {
        let today = DateTime::<Utc>::from_timestamp_millis(now)?.date_naive();
        let (first, next) = match self {
            Period::All => return None,
            Period::Week => {
                let monday = today.checked_sub_days(Days::new(u64::from(
                    today.weekday().num_days_from_monday(),
                )))?;
                (monday, monday.checked_add_days(Days::new(7))?)
            }
            Period::Month => {
                let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
                (first, first.checked_add_months(Months::new(1))?)
            }
            Period::Year => {
                let first = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;
                (first, NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?)
            }
        };
        Some(Span::new(midnight(first)?, midnight(next)?))
    }
}

fn midnight(day: NaiveDate) -> Option<Ms> {
    Some(day.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<Ulid>,
    pub period: Period,
    pub status: Option<BookingStatus>,
}

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let room_id = self
            .get_room_for_reservation(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let guard = rs.read().await;
        guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Reservations sorted by start, filtered by room, status and calendar period.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        self.list_reservations_at(filter, now_ms()).await
    }

    pub(super) async fn list_reservations_at(
        &self,
        filter: &ReservationFilter,
        now: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = filter.period.window_at(now);
        let rooms = match filter.room_id {
            Some(id) => vec![self.get_room(&id).ok_or(EngineError::RoomNotFound(id))?],
            None => self.rooms.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| window.is_none_or(|w| w.contains_instant(r.span.start)))
                    .filter(|r| filter.status.is_none_or(|s| r.status == s))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> Ms {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn day(y: i32, m: u32, d: u32) -> Ms {
        midnight(NaiveDate::from_ymd_opt(y, m, d).unwrap()).unwrap()
    }

    #[test]
    fn week_runs_monday_to_monday() {
        // 2025-03-13 is a Thursday.
        let w = Period::Week.window_at(at(2025, 3, 13)).unwrap();
        assert_eq!(w, Span::new(day(2025, 3, 10), day(2025, 3, 17)));
    }

    #[test]
    fn sunday_belongs_to_the_week_before() {
        let w = Period::Week.window_at(at(2025, 3, 16)).unwrap();
        assert_eq!(w.start, day(2025, 3, 10));
    }

    #[test]
    fn month_and_year_windows() {
        assert_eq!(
            Period::Month.window_at(at(2024, 2, 20)),
            Some(Span::new(day(2024, 2, 1), day(2024, 3, 1)))
        );
        assert_eq!(
            Period::Month.window_at(at(2024, 12, 31)),
            Some(Span::new(day(2024, 12, 1), day(2025, 1, 1)))
        );
        assert_eq!(
            Period::Year.window_at(at(2024, 7, 4)),
            Some(Span::new(day(2024, 1, 1), day(2025, 1, 1)))
        );
        assert_eq!(Period::All.window_at(at(2024, 7, 4)), None);
    }

    #[test]
    fn period_names() {
        assert_eq!(Period::parse("WEEK"), Some(Period::Week));
        assert_eq!(Period::parse("all"), Some(Period::All));
        assert_eq!(Period::parse("decade"), None);
        assert_eq!(Period::Month.as_str(), "month");
    }
}

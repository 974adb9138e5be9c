use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Confirmation;

use super::conflict::{check_no_conflict, checked_stay, now_ms};
use super::pricing::quote;
use super::{Engine, EngineError};

/// Attempts at pinning a reservation while concurrent moves relocate it.
const LOCK_RETRIES: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewReservation {
    pub id: Ulid,
    pub room_id: Option<Ulid>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub payment_method: Option<PaymentMethod>,
    pub user_id: Option<Ulid>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
}

/// Fields a reservation update may touch. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub room_id: Option<Ulid>,
    pub user_id: Option<Option<Ulid>>,
    pub guest_name: Option<Option<String>>,
    pub guest_email: Option<Option<String>>,
    pub guest_phone: Option<Option<String>>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
    pub status: Option<BookingStatus>,
    pub payment_method: Option<PaymentMethod>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        *self == ReservationPatch::default()
    }

    /// Room or dates change, so price and availability must be recomputed.
    fn moves_stay(&self) -> bool {
        self.room_id.is_some() || self.start.is_some() || self.end.is_some()
    }
}

type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

enum Locked {
    Same(RoomGuard),
    Pair { from: RoomGuard, to: RoomGuard },
}

/// Blank strings count as absent.
fn normalized(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_guest_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("guest name too long"));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), EngineError> {
    if email.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !well_formed {
        return Err(EngineError::Validation(format!("invalid email address: {email}")));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: &str) -> Result<(), EngineError> {
    if phone.len() != 10 || !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EngineError::Validation(format!(
            "phone must be exactly 10 digits: {phone}"
        )));
    }
    Ok(())
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::Validation(format!("{field} is required")))
}

impl Engine {
    pub async fn create_reservation(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let room_id = required(new.room_id, "room_id")?;
        let start = required(new.start, "start")?;
        let end = required(new.end, "end")?;
        let payment_method = required(new.payment_method, "payment_method")?;
        let span = checked_stay(start, end)?;

        let guest_name = normalized(new.guest_name);
        let guest_email = normalized(new.guest_email);
        let guest_phone = normalized(new.guest_phone);
        if let Some(name) = &guest_name {
            validate_guest_name(name)?;
        }
        if let Some(email) = &guest_email {
            validate_email(email)?;
        }
        if let Some(phone) = &guest_phone {
            validate_phone(phone)?;
        }
        if let Some(uid) = new.user_id
            && !self.users.contains_key(&uid)
        {
            return Err(EngineError::NotFound("user", uid));
        }
        if guest_email.is_none() && new.user_id.is_none() {
            debug!("reservation {} has no guest contact, no confirmation will be sent", new.id);
        }

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(room_id));
        }
        // Ids are unique across rooms, and another room's lock doesn't cover us:
        // claim the id in the index first and release it on any failure below.
        match self.reservation_index.entry(new.id) {
            dashmap::Entry::Occupied(_) => {
                return Err(EngineError::Conflict(format!("reservation {} already exists", new.id)));
            }
            dashmap::Entry::Vacant(slot) => {
                slot.insert(room_id);
            }
        }
        let release = |e: EngineError| {
            self.reservation_index.remove(&new.id);
            e
        };
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(release(EngineError::LimitExceeded("too many reservations on room")));
        }

        if let Err(e) = check_no_conflict(&guard, &span, None) {
            metrics::counter!(crate::observability::DOUBLE_BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(release(e));
        }
        let price = quote(&guard.room, &span).map_err(release)?;

        let reservation = Reservation {
            id: new.id,
            room_id,
            user_id: new.user_id,
            guest_name,
            guest_email,
            guest_phone,
            span,
            status: BookingStatus::Pending,
            total_price: price.total,
            payment_method,
            created_at: now_ms(),
        };
        self.persist_and_apply(
            &mut guard,
            &Event::ReservationCreated {
                reservation: reservation.clone(),
            },
        )
        .await
        .map_err(release)?;
        let room = guard.room.clone();
        drop(guard);

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation = %reservation.id,
            room = room.number,
            nights = price.nights,
            total = %format_cents(price.total),
            "reservation created"
        );
        self.queue_confirmation(&reservation, room).await;
        Ok(reservation)
    }

    /// Hand the confirmation to the notifier. Runs after commit and never fails the write.
    async fn queue_confirmation(&self, reservation: &Reservation, room: Room) {
        let Some(email) = reservation.guest_email.clone() else {
            return;
        };
        let payment = self.payment_config.read().await.clone();
        self.notify.send(Confirmation {
            reservation: reservation.clone(),
            room,
            guest_name: reservation
                .guest_name
                .clone()
                .unwrap_or_else(|| "Guest".to_string()),
            guest_email: email,
            payment,
        });
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        mut patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("no reservation fields to update".into()));
        }
        if let Some(name) = patch.guest_name.take() {
            let name = normalized(name);
            if let Some(n) = &name {
                validate_guest_name(n)?;
            }
            patch.guest_name = Some(name);
        }
        if let Some(email) = patch.guest_email.take() {
            let email = normalized(email);
            if let Some(e) = &email {
                validate_email(e)?;
            }
            patch.guest_email = Some(email);
        }
        if let Some(phone) = patch.guest_phone.take() {
            let phone = normalized(phone);
            if let Some(p) = &phone {
                validate_phone(p)?;
            }
            patch.guest_phone = Some(phone);
        }
        if let Some(Some(uid)) = patch.user_id
            && !self.users.contains_key(&uid)
        {
            return Err(EngineError::NotFound("user", uid));
        }

        match self.lock_for_update(id, patch.room_id).await? {
            Locked::Same(mut guard) => {
                let current = guard
                    .reservation(id)
                    .cloned()
                    .ok_or(EngineError::ReservationNotFound(id))?;
                let updated = patched(&current, &patch, &guard)?;
                self.persist_and_apply(
                    &mut guard,
                    &Event::ReservationUpdated {
                        reservation: updated.clone(),
                    },
                )
                .await?;
                Ok(updated)
            }
            Locked::Pair { mut from, mut to } => {
                let current = from
                    .reservation(id)
                    .cloned()
                    .ok_or(EngineError::ReservationNotFound(id))?;
                if to.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
                    return Err(EngineError::LimitExceeded("too many reservations on room"));
                }
                let updated = patched(&current, &patch, &to)?;
                self.persist_move(&mut from, &mut to, updated.clone()).await?;
                info!(reservation = %id, from = %current.room_id, to = %updated.room_id, "reservation moved");
                Ok(updated)
            }
        }
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let Locked::Same(mut guard) = self.lock_for_update(id, None).await? else {
            return Err(EngineError::ReservationNotFound(id));
        };
        let removed = guard
            .reservation(id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(id))?;
        let event = Event::ReservationDeleted {
            id,
            room_id: guard.id(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(removed)
    }

    /// Take the write lock(s) a reservation change needs: its own room, plus the
    /// destination room when moving (both in id order). Retries when a concurrent
    /// move relocated the reservation between lookup and lock.
    async fn lock_for_update(&self, id: Ulid, target: Option<Ulid>) -> Result<Locked, EngineError> {
        for _ in 0..LOCK_RETRIES {
            let source = self
                .get_room_for_reservation(&id)
                .ok_or(EngineError::ReservationNotFound(id))?;
            let target = target.unwrap_or(source);
            let source_rs = self
                .get_room(&source)
                .ok_or(EngineError::ReservationNotFound(id))?;

            if target == source {
                let guard = source_rs.write_owned().await;
                if !guard.retired && guard.reservation(id).is_some() {
                    return Ok(Locked::Same(guard));
                }
                continue;
            }

            let target_rs = self
                .get_room(&target)
                .ok_or(EngineError::RoomNotFound(target))?;
            let (from, to) = if source < target {
                let from = source_rs.write_owned().await;
                (from, target_rs.write_owned().await)
            } else {
                let to = target_rs.write_owned().await;
                (source_rs.write_owned().await, to)
            };
            if to.retired {
                return Err(EngineError::RoomNotFound(target));
            }
            if !from.retired && from.reservation(id).is_some() {
                return Ok(Locked::Pair { from, to });
            }
        }
        Err(EngineError::ReservationNotFound(id))
    }
}

/// Apply `patch` to `current`, validating the transition and, when the stay moves,
/// availability on `target` and the new price.
fn patched(
    current: &Reservation,
    patch: &ReservationPatch,
    target: &RoomState,
) -> Result<Reservation, EngineError> {
    let status = patch.status.unwrap_or(current.status);
    if !current.status.can_transition_to(status) {
        return Err(EngineError::InvalidTransition {
            from: current.status,
            to: status,
        });
    }

    let mut next = current.clone();
    next.room_id = target.id();
    next.status = status;
    if let Some(user_id) = patch.user_id {
        next.user_id = user_id;
    }
    if let Some(name) = &patch.guest_name {
        next.guest_name = name.clone();
    }
    if let Some(email) = &patch.guest_email {
        next.guest_email = email.clone();
    }
    if let Some(phone) = &patch.guest_phone {
        next.guest_phone = phone.clone();
    }
    if let Some(method) = patch.payment_method {
        next.payment_method = method;
    }

    if patch.moves_stay() {
        let span = checked_stay(
            patch.start.unwrap_or(current.span.start),
            patch.end.unwrap_or(current.span.end),
        )?;
        if status.is_active()
            && let Err(e) = check_no_conflict(target, &span, Some(current.id))
        {
            metrics::counter!(crate::observability::DOUBLE_BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }
        next.total_price = quote(&target.room, &span)?.total;
        next.span = span;
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(validate_email("ana@example.com").is_ok());
        assert!(validate_email("ana@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ana example@x.com").is_err());
        assert!(validate_email("plain").is_err());
    }

    #[test]
    fn phone_shape() {
        assert!(validate_phone("9511234567").is_ok());
        assert!(validate_phone("951123456").is_err());
        assert!(validate_phone("95112345678").is_err());
        assert!(validate_phone("951-123-45").is_err());
    }

    #[test]
    fn blank_strings_are_absent() {
        assert_eq!(normalized(Some("   ".into())), None);
        assert_eq!(normalized(Some(" Ana ".into())), Some("Ana".into()));
        assert_eq!(normalized(None), None);
    }

    #[test]
    fn patch_emptiness() {
        assert!(ReservationPatch::default().is_empty());
        let p = ReservationPatch {
            status: Some(BookingStatus::Confirmed),
            ..Default::default()
        };
        assert!(!p.is_empty());
        assert!(!p.moves_stay());
        let p = ReservationPatch {
            end: Some(DAY_MS),
            ..Default::default()
        };
        assert!(p.moves_stay());
    }
}

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Money in minor units (cents). Rendered with two decimals.
pub type Cents = i64;

/// One night of a stay.
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Render cents as a decimal amount, e.g. `150000` → `"1500.00"`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

// ── Status & enums ───────────────────────────────────────────────

/// Lifecycle of a reservation (and of a social-area event).
///
/// `Pending → Confirmed`, `Pending → Cancelled`, `Confirmed → Cancelled`.
/// Cancelled is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Active bookings occupy their slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// Staying in the same status is always allowed (no-op write).
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Confirmed, Confirmed)
                | (Cancelled, Cancelled)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" | "canceled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cash" => Some(PaymentMethod::Cash),
            "transfer" => Some(PaymentMethod::Transfer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Admin,
    Employee,
    Guest,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Employee => "employee",
            UserRole::Guest => "guest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "employee" => Some(UserRole::Employee),
            "guest" => Some(UserRole::Guest),
            _ => None,
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: u32,
    pub kind: String,
    pub nightly_rate: Cents,
    /// Ordered image references, relative to the image store root.
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Option<Ulid>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub span: Span,
    pub status: BookingStatus,
    pub total_price: Cents,
    pub payment_method: PaymentMethod,
    pub created_at: Ms,
}

/// A booking of the social area. Events do not conflict with each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialEvent {
    pub id: Ulid,
    pub client_name: String,
    pub event_date: Ms,
    pub window: Option<Span>,
    pub usage: Option<String>,
    pub attendee_limit: Option<u32>,
    pub area: String,
    pub amount: Cents,
    pub status: BookingStatus,
}

pub const DEFAULT_EVENT_AREA: &str = "Social Area";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuCategory {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub price: Cents,
    pub category_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub role: UserRole,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    pub bank: String,
    pub account_number: String,
    pub clabe: String,
    pub whatsapp_url: String,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            bank: "Unconfigured Bank".into(),
            account_number: "0000 0000 0000 0000".into(),
            clabe: "000 000 00000000000 0".into(),
            whatsapp_url: "https://wa.me/".into(),
        }
    }
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every reservation of this room (any status), sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    /// Set when the room is deleted, so writers that raced the delete back off.
    pub retired: bool,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
            retired: false,
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Replace a reservation in place, re-sorting if its start moved.
    pub fn replace_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        self.insert_reservation(reservation);
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Active reservations overlapping `query`, skipping `exclude`.
    pub fn active_overlapping(
        &self,
        query: &Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query)
            .filter(move |r| r.status.is_active() && Some(r.id) != exclude)
    }

    pub fn has_active_reservations(&self) -> bool {
        self.reservations.iter().any(|r| r.status.is_active())
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        reservation: Reservation,
    },
    /// Reservation changed rooms; `reservation.room_id` is the destination.
    ReservationMoved {
        from_room_id: Ulid,
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    SocialEventSaved {
        event: SocialEvent,
    },
    SocialEventDeleted {
        id: Ulid,
    },
    CategoryCreated {
        category: MenuCategory,
    },
    MenuItemSaved {
        item: MenuItem,
    },
    MenuItemDeleted {
        id: Ulid,
    },
    UserCreated {
        user: User,
    },
    PaymentConfigSet {
        config: PaymentConfig,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Price of a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub room_id: Ulid,
    pub nights: i64,
    pub nightly_rate: Cents,
    pub total: Cents,
}

/// User row as exposed to clients. Never carries the hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Ulid,
    pub username: String,
    pub role: UserRole,
    pub phone: Option<String>,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            role: u.role,
            phone: u.phone.clone(),
        }
    }
}

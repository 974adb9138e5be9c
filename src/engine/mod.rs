mod availability;
mod catalog;
mod conflict;
mod error;
mod pricing;
mod queries;
mod reservations;
mod rooms;
mod users;

pub use availability::{free_windows, merge_overlapping, room_is_free, subtract_intervals};
pub use catalog::{MenuItemPatch, NewMenuItem, NewSocialEvent, PaymentConfigPatch, SocialEventPatch};
pub use conflict::has_conflict;
pub use error::EngineError;
pub use pricing::{nights_between, quote};
pub use queries::{Period, ReservationFilter};
pub use reservations::{NewReservation, ReservationPatch};
pub use rooms::{NewRoom, RoomPatch};
pub use users::NewUser;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::images::ImageStore;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, then one
/// flush + fsync for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// One property's booking state: rooms with their reservations, plus the catalog.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) images: Arc<dyn ImageStore>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    /// Room number → room id.
    pub(super) room_numbers: DashMap<u32, Ulid>,
    pub(super) social_events: DashMap<Ulid, SocialEvent>,
    pub(super) categories: DashMap<Ulid, MenuCategory>,
    pub(super) menu_items: DashMap<Ulid, MenuItem>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) payment_config: RwLock<PaymentConfig>,
    /// Serializes catalog writes so uniqueness checks and their writes are atomic.
    pub(super) catalog_lock: Mutex<()>,
}

/// Apply a reservation/room event to one room (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.room_id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationUpdated { reservation } => {
            rs.replace_reservation(reservation.clone());
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        // Moves touch two rooms; creation, deletion and the catalog are handled by the engine.
        _ => {}
    }
}

/// Move a reservation between two locked rooms.
fn apply_move(from: &mut RoomState, to: &mut RoomState, reservation: &Reservation, index: &DashMap<Ulid, Ulid>) {
    from.remove_reservation(reservation.id);
    to.insert_reservation(reservation.clone());
    index.insert(reservation.id, reservation.room_id);
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        images: Arc<dyn ImageStore>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            wal_tx,
            notify,
            images,
            reservation_index: DashMap::new(),
            room_numbers: DashMap::new(),
            social_events: DashMap::new(),
            categories: DashMap::new(),
            menu_items: DashMap::new(),
            users: DashMap::new(),
            payment_config: RwLock::new(PaymentConfig::default()),
            catalog_lock: Mutex::new(()),
        };

        // We're the sole owner of every lock during replay, so try_read/try_write
        // never contend. Blocking variants are off limits: this may run inside an
        // async context (lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                self.room_numbers.insert(room.number, room.id);
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::RoomDeleted { id } => {
                if let Some((_, rs)) = self.rooms.remove(id)
                    && let Ok(guard) = rs.try_read()
                {
                    self.room_numbers.remove(&guard.room.number);
                    for r in &guard.reservations {
                        self.reservation_index.remove(&r.id);
                    }
                }
            }
            Event::RoomUpdated { room } => {
                if let Some(rs) = self.get_room(&room.id)
                    && let Ok(mut guard) = rs.try_write()
                {
                    self.room_numbers.remove(&guard.room.number);
                    self.room_numbers.insert(room.number, room.id);
                    apply_to_room(&mut guard, event, &self.reservation_index);
                }
            }
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                self.replay_on_room(reservation.room_id, event);
            }
            Event::ReservationDeleted { room_id, .. } => self.replay_on_room(*room_id, event),
            Event::ReservationMoved {
                from_room_id,
                reservation,
            } => {
                let (Some(from), Some(to)) = (self.get_room(from_room_id), self.get_room(&reservation.room_id)) else {
                    warn!("replay: skipping move of {} between unknown rooms", reservation.id);
                    return;
                };
                if let (Ok(mut from), Ok(mut to)) = (from.try_write(), to.try_write()) {
                    apply_move(&mut from, &mut to, reservation, &self.reservation_index);
                }
            }
            other => self.apply_catalog(other),
        }
    }

    fn replay_on_room(&self, room_id: Ulid, event: &Event) {
        match self.get_room(&room_id) {
            Some(rs) => {
                if let Ok(mut guard) = rs.try_write() {
                    apply_to_room(&mut guard, event, &self.reservation_index);
                }
            }
            None => warn!("replay: event for unknown room {room_id} skipped"),
        }
    }

    /// Apply a catalog event. Caller holds `catalog_lock` (or is replaying).
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::SocialEventSaved { event } => {
                self.social_events.insert(event.id, event.clone());
            }
            Event::SocialEventDeleted { id } => {
                self.social_events.remove(id);
            }
            Event::CategoryCreated { category } => {
                self.categories.insert(category.id, category.clone());
            }
            Event::MenuItemSaved { item } => {
                self.menu_items.insert(item.id, item.clone());
            }
            Event::MenuItemDeleted { id } => {
                self.menu_items.remove(id);
            }
            Event::UserCreated { user } => {
                self.users.insert(user.id, user.clone());
            }
            Event::PaymentConfigSet { config } => {
                if let Ok(mut guard) = self.payment_config.try_write() {
                    *guard = config.clone();
                }
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call, while the caller holds the room's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_index);
        Ok(())
    }

    pub(super) async fn persist_move(
        &self,
        from: &mut RoomState,
        to: &mut RoomState,
        reservation: Reservation,
    ) -> Result<(), EngineError> {
        let event = Event::ReservationMoved {
            from_room_id: from.id(),
            reservation,
        };
        self.wal_append(&event).await?;
        if let Event::ReservationMoved { reservation, .. } = &event {
            apply_move(from, to, reservation, &self.reservation_index);
        }
        Ok(())
    }

    /// WAL-append + apply for catalog records. Caller holds `catalog_lock`.
    pub(super) async fn persist_catalog(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        if let Event::PaymentConfigSet { config } = &event {
            *self.payment_config.write().await = config.clone();
        } else {
            self.apply_catalog(&event);
        }
        Ok(())
    }

    /// Remove image files that are no longer referenced. Never fails the caller.
    pub(super) async fn discard_images(&self, references: &[String]) {
        for reference in references {
            match self.images.remove(reference).await {
                Ok(()) => tracing::debug!("removed image {reference}"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!("image {reference} already gone")
                }
                Err(e) => warn!("could not remove image {reference}: {e}"),
            }
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    /// Every writer is held off from the snapshot until the new file is in place, so
    /// nothing acknowledged in between can be left out of it.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Catalog first, then rooms in id order: the order room updates and moves use.
        let _catalog = self.catalog_lock.lock().await;
        let mut room_arcs: Vec<(Ulid, SharedRoomState)> = self
            .rooms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        room_arcs.sort_unstable_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(room_arcs.len());
        for (_, rs) in room_arcs {
            guards.push(rs.write_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            if guard.retired {
                continue;
            }
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationCreated {
                    reservation: reservation.clone(),
                });
            }
        }

        // Categories before the items that reference them.
        events.extend(self.categories.iter().map(|e| Event::CategoryCreated {
            category: e.value().clone(),
        }));
        events.extend(self.menu_items.iter().map(|e| Event::MenuItemSaved {
            item: e.value().clone(),
        }));
        events.extend(self.social_events.iter().map(|e| Event::SocialEventSaved {
            event: e.value().clone(),
        }));
        events.extend(self.users.iter().map(|e| Event::UserCreated {
            user: e.value().clone(),
        }));
        events.push(Event::PaymentConfigSet {
            config: self.payment_config.read().await.clone(),
        });

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let swapped = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        swapped
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

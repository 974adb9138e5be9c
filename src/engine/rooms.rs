use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRoom {
    pub id: Ulid,
    pub number: Option<u32>,
    pub kind: Option<String>,
    pub nightly_rate: Option<Cents>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub number: Option<u32>,
    pub kind: Option<String>,
    pub nightly_rate: Option<Cents>,
    pub images: Option<Vec<String>>,
}

impl RoomPatch {
    pub fn is_empty(&self) -> bool {
        *self == RoomPatch::default()
    }
}

fn validate_kind(kind: &str) -> Result<(), EngineError> {
    if kind.trim().is_empty() {
        return Err(EngineError::Validation("room kind must not be empty".into()));
    }
    if kind.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room kind too long"));
    }
    Ok(())
}

fn validate_rate(rate: Cents) -> Result<(), EngineError> {
    if rate < 0 {
        return Err(EngineError::Validation("nightly rate must not be negative".into()));
    }
    Ok(())
}

impl Engine {
    fn validate_images(&self, images: &[String]) -> Result<(), EngineError> {
        if images.len() > MAX_IMAGES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many images on room"));
        }
        for reference in images {
            self.images.validate(reference).map_err(EngineError::Validation)?;
        }
        Ok(())
    }

    fn check_number_free(&self, number: u32, owner: Option<Ulid>) -> Result<(), EngineError> {
        match self.room_numbers.get(&number) {
            Some(existing) if Some(*existing.value()) != owner => {
                Err(EngineError::Conflict(format!("room number {number} already exists")))
            }
            _ => Ok(()),
        }
    }

    pub async fn create_room(&self, new: NewRoom) -> Result<Room, EngineError> {
        let number = new
            .number
            .ok_or_else(|| EngineError::Validation("room number is required".into()))?;
        let kind = new
            .kind
            .ok_or_else(|| EngineError::Validation("room kind is required".into()))?;
        let nightly_rate = new
            .nightly_rate
            .ok_or_else(|| EngineError::Validation("nightly rate is required".into()))?;
        validate_kind(&kind)?;
        validate_rate(nightly_rate)?;
        self.validate_images(&new.images)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&new.id) {
            return Err(EngineError::Conflict(format!("room {} already exists", new.id)));
        }
        self.check_number_free(number, None)?;

        let room = Room {
            id: new.id,
            number,
            kind,
            nightly_rate,
            images: new.images,
        };
        self.wal_append(&Event::RoomCreated { room: room.clone() }).await?;
        self.room_numbers.insert(number, room.id);
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        info!(room = %room.id, number, "room created");
        Ok(room)
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<Room, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("no room fields to update".into()));
        }
        if let Some(kind) = &patch.kind {
            validate_kind(kind)?;
        }
        if let Some(rate) = patch.nightly_rate {
            validate_rate(rate)?;
        }
        if let Some(images) = &patch.images {
            self.validate_images(images)?;
        }

        let _catalog = self.catalog_lock.lock().await;
        let rs = self.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(id));
        }
        if let Some(number) = patch.number {
            self.check_number_free(number, Some(id))?;
        }

        let old = guard.room.clone();
        let mut room = old.clone();
        if let Some(number) = patch.number {
            room.number = number;
        }
        if let Some(kind) = patch.kind {
            room.kind = kind;
        }
        if let Some(rate) = patch.nightly_rate {
            room.nightly_rate = rate;
        }
        if let Some(images) = patch.images {
            room.images = images;
        }

        self.persist_and_apply(&mut guard, &Event::RoomUpdated { room: room.clone() })
            .await?;
        if old.number != room.number {
            self.room_numbers.remove(&old.number);
            self.room_numbers.insert(room.number, id);
        }
        drop(guard);

        let dropped: Vec<String> = old
            .images
            .into_iter()
            .filter(|img| !room.images.contains(img))
            .collect();
        self.discard_images(&dropped).await;
        Ok(room)
    }

    /// Delete a room without active reservations. Cancelled history goes with it.
    pub async fn delete_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let _catalog = self.catalog_lock.lock().await;
        let rs = self.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(id));
        }
        if guard.has_active_reservations() {
            return Err(EngineError::RoomInUse(id));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        guard.retired = true;
        self.rooms.remove(&id);
        self.room_numbers.remove(&guard.room.number);
        for r in &guard.reservations {
            self.reservation_index.remove(&r.id);
        }
        let room = guard.room.clone();
        drop(guard);

        self.discard_images(&room.images).await;
        info!(room = %id, number = room.number, "room deleted");
        Ok(room)
    }

    pub async fn get_room_record(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::RoomNotFound(id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::RoomNotFound(id));
        }
        Ok(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let snapshot: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(snapshot.len());
        for rs in snapshot {
            let guard = rs.read().await;
            if !guard.retired {
                rooms.push(guard.room.clone());
            }
        }
        rooms.sort_by_key(|r| r.number);
        rooms
    }
}

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{free_windows, occupant_at};
use super::conflict::{now_ms, validate_window};
use super::{require_elevated, unindex_room, Engine, EngineError, Entity};

fn room_info(rs: &RoomState, at: Ms) -> RoomInfo {
    RoomInfo {
        id: rs.id,
        number: rs.number.clone(),
        status: rs.status,
        occupied_by: occupant_at(rs, at).map(|b| b.id),
    }
}

impl Engine {
    pub async fn register_room(
        &self,
        actor: &Actor,
        id: Ulid,
        number: String,
        status: RoomStatus,
    ) -> Result<RoomInfo, EngineError> {
        require_elevated(actor, "register rooms")?;
        if number.trim().is_empty() {
            return Err(EngineError::InvalidField { field: "number", reason: "must not be empty" });
        }
        if number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("room number too long"));
        }

        let _gate = self.gate.read().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        // The room goes into the map locked and retired, so concurrent
        // lookups wait for the log append and see nothing if it fails.
        let mut pending = RoomState::new(id, number.clone(), status);
        pending.retired = true;
        let handle = Arc::new(RwLock::new(pending));
        let mut guard = handle
            .clone()
            .try_write_owned()
            .map_err(|_| EngineError::Unavailable("fresh room lock contended".into()))?;
        match self.rooms.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        // Racing registrations can both pass the check above; whoever lands
        // past the limit backs out.
        if self.rooms.len() > MAX_ROOMS {
            self.rooms.remove(&id);
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let event = Event::RoomRegistered { id, number, status };
        if let Err(e) = self.wal_append(&event).await {
            self.rooms.remove(&id);
            return Err(e);
        }
        guard.retired = false;
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::ROOMS_REGISTERED).set(self.rooms.len() as f64);
        Ok(room_info(&guard, now_ms()))
    }

    pub async fn set_room_status(
        &self,
        actor: &Actor,
        id: Ulid,
        status: RoomStatus,
    ) -> Result<RoomInfo, EngineError> {
        require_elevated(actor, "change room status")?;
        let mut guard = self.room_write(id).await?;
        let event = Event::RoomStatusChanged { id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room_info(&guard, now_ms()))
    }

    pub async fn remove_room(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        if actor.role != Role::Admin {
            return Err(EngineError::Forbidden { user: actor.user_id, action: "remove rooms" });
        }
        let mut guard = self.room_write(id).await?;
        if guard.has_live_bookings() {
            return Err(EngineError::InvalidState { id, reason: "room has live bookings" });
        }

        let event = Event::RoomRemoved { id };
        self.wal_append(&event).await?;
        guard.retired = true;
        unindex_room(&guard, &self.entity_to_room);
        self.rooms.remove(&id);
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::ROOMS_REGISTERED).set(self.rooms.len() as f64);
        Ok(())
    }

    pub async fn get_room(&self, id: Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self
            .get_room_handle(&id)
            .ok_or(EngineError::NotFound(Entity::Room, id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, id));
        }
        Ok(room_info(&guard, now_ms()))
    }

    /// Every room, ordered by room number.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let now = now_ms();
        let mut out = Vec::new();
        for handle in self.room_handles() {
            let guard = handle.read().await;
            if !guard.retired {
                out.push(room_info(&guard, now));
            }
        }
        out.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
        out
    }

    /// Free sub-windows of `[start, end)`. Derived from live bookings on every call.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_window("availability", start, end, MAX_QUERY_WINDOW_MS)?;
        let rs = self
            .get_room_handle(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(free_windows(&guard, &query))
    }
}

use ulid::Ulid;

use crate::limits::MAX_BLOB_LEN;
use crate::model::*;
use crate::observability::CONTROL_UPDATES_TOTAL;

use super::conflict::now_ms;
use super::{Engine, EngineError, Entity};

impl Engine {
    /// Set one automation field of a room. The first write creates the
    /// state with only that field set; later writes leave other fields alone.
    /// Anyone may drive a room's automation; `changed_by` records who did.
    pub async fn upsert_control(
        &self,
        actor: &Actor,
        room_id: Ulid,
        change: ControlChange,
    ) -> Result<RoomControlState, EngineError> {
        if let ControlChange::Lighting(b) | ControlChange::Climate(b) | ControlChange::Curtains(b) =
            &change
            && b.len() > MAX_BLOB_LEN
        {
            return Err(EngineError::LimitExceeded(change.field_name()));
        }
        let mut guard = self.room_write(room_id).await?;
        let field = change.field_name();
        let event = Event::ControlsChanged {
            room_id,
            change,
            by: actor.user_id,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(CONTROL_UPDATES_TOTAL, "field" => field).increment(1);
        guard
            .controls
            .clone()
            .ok_or(EngineError::NotFound(Entity::Room, room_id))
    }

    /// `Ok(None)` until the room sees its first automation write.
    pub async fn get_controls(
        &self,
        room_id: Ulid,
    ) -> Result<Option<RoomControlState>, EngineError> {
        let rs = self
            .get_room_handle(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(guard.controls.clone())
    }
}

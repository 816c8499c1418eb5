use ulid::Ulid;

use crate::model::*;

use super::{require_elevated, require_owner_or_elevated, Engine, EngineError, Entity};

impl Engine {
    /// Read one record out of whichever room owns `id`.
    async fn read_entity<T>(
        &self,
        entity: Entity,
        id: Ulid,
        pick: impl FnOnce(&RoomState) -> Option<T>,
    ) -> Result<T, EngineError> {
        let room_id = self
            .room_for_entity(&id)
            .ok_or(EngineError::NotFound(entity, id))?;
        let rs = self
            .get_room_handle(&room_id)
            .ok_or(EngineError::NotFound(entity, id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(entity, id));
        }
        pick(&*guard).ok_or(EngineError::NotFound(entity, id))
    }

    /// Scan every room, collecting what `pick` extracts.
    async fn collect_all<T>(&self, mut pick: impl FnMut(&RoomState, &mut Vec<T>)) -> Vec<T> {
        let mut out = Vec::new();
        for handle in self.room_handles() {
            let guard = handle.read().await;
            if !guard.retired {
                pick(&*guard, &mut out);
            }
        }
        out
    }

    async fn read_room<T>(
        &self,
        room_id: Ulid,
        pick: impl FnOnce(&RoomState) -> T,
    ) -> Result<T, EngineError> {
        let rs = self
            .get_room_handle(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room, room_id))?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::NotFound(Entity::Room, room_id));
        }
        Ok(pick(&*guard))
    }

    // ── Bookings ─────────────────────────────────────────────────

    pub async fn get_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .read_entity(Entity::Booking, id, |rs| rs.booking(id).cloned())
            .await?;
        require_owner_or_elevated(actor, booking.user_id, "view another guest's booking")?;
        Ok(booking)
    }

    /// A user's bookings, earliest check-in first. Guests may only list their own.
    pub async fn bookings_for_user(
        &self,
        actor: &Actor,
        user_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        require_owner_or_elevated(actor, user_id, "list another guest's bookings")?;
        let mut out = self
            .collect_all(|rs, out: &mut Vec<Booking>| {
                out.extend(rs.bookings.iter().filter(|b| b.user_id == user_id).cloned())
            })
            .await;
        out.sort_by_key(|b| (b.stay.start, b.id));
        Ok(out)
    }

    pub async fn all_bookings(&self, actor: &Actor) -> Result<Vec<Booking>, EngineError> {
        require_elevated(actor, "list all bookings")?;
        let mut out = self
            .collect_all(|rs, out: &mut Vec<Booking>| out.extend(rs.bookings.iter().cloned()))
            .await;
        out.sort_by_key(|b| (b.stay.start, b.id));
        Ok(out)
    }

    pub async fn bookings_for_room(
        &self,
        actor: &Actor,
        room_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        require_elevated(actor, "list a room's bookings")?;
        self.read_room(room_id, |rs| rs.bookings.clone()).await
    }

    // ── Guest access ─────────────────────────────────────────────

    /// Visible to the primary guest, the guest it is shared with, and staff.
    pub async fn get_access(&self, actor: &Actor, id: Ulid) -> Result<GuestAccess, EngineError> {
        let access = self
            .read_entity(Entity::GuestAccess, id, |rs| rs.access(id).cloned())
            .await?;
        if access.shared_with_user_id != Some(actor.user_id) {
            require_owner_or_elevated(actor, access.primary_guest_id, "view another guest's access")?;
        }
        Ok(access)
    }

    /// Permissions a user has handed out.
    pub async fn access_given_by(
        &self,
        actor: &Actor,
        user_id: Ulid,
    ) -> Result<Vec<GuestAccess>, EngineError> {
        require_owner_or_elevated(actor, user_id, "list another guest's access")?;
        Ok(self
            .collect_all(|rs, out: &mut Vec<GuestAccess>| {
                out.extend(rs.access.iter().filter(|a| a.primary_guest_id == user_id).cloned())
            })
            .await)
    }

    /// Permissions other guests have shared with a user.
    pub async fn access_shared_with(
        &self,
        actor: &Actor,
        user_id: Ulid,
    ) -> Result<Vec<GuestAccess>, EngineError> {
        require_owner_or_elevated(actor, user_id, "list another guest's access")?;
        Ok(self
            .collect_all(|rs, out: &mut Vec<GuestAccess>| {
                out.extend(
                    rs.access
                        .iter()
                        .filter(|a| a.shared_with_user_id == Some(user_id))
                        .cloned(),
                )
            })
            .await)
    }

    pub async fn access_for_room(
        &self,
        actor: &Actor,
        room_id: Ulid,
    ) -> Result<Vec<GuestAccess>, EngineError> {
        require_elevated(actor, "list a room's access")?;
        self.read_room(room_id, |rs| rs.access.clone()).await
    }

    pub async fn all_access(&self, actor: &Actor) -> Result<Vec<GuestAccess>, EngineError> {
        require_elevated(actor, "list all access")?;
        Ok(self
            .collect_all(|rs, out: &mut Vec<GuestAccess>| out.extend(rs.access.iter().cloned()))
            .await)
    }

    // ── Alarms ───────────────────────────────────────────────────

    pub async fn get_alarm(&self, actor: &Actor, id: Ulid) -> Result<Alarm, EngineError> {
        let alarm = self
            .read_entity(Entity::Alarm, id, |rs| rs.alarm(id).cloned())
            .await?;
        require_owner_or_elevated(actor, alarm.user_id, "view another guest's alarm")?;
        Ok(alarm)
    }

    pub async fn alarms_for_user(
        &self,
        actor: &Actor,
        user_id: Ulid,
    ) -> Result<Vec<Alarm>, EngineError> {
        require_owner_or_elevated(actor, user_id, "list another guest's alarms")?;
        Ok(self
            .collect_all(|rs, out: &mut Vec<Alarm>| {
                out.extend(rs.alarms.iter().filter(|a| a.user_id == user_id).cloned())
            })
            .await)
    }

    pub async fn alarms_for_room(
        &self,
        actor: &Actor,
        room_id: Ulid,
    ) -> Result<Vec<Alarm>, EngineError> {
        require_elevated(actor, "list a room's alarms")?;
        self.read_room(room_id, |rs| rs.alarms.clone()).await
    }

    pub async fn all_alarms(&self, actor: &Actor) -> Result<Vec<Alarm>, EngineError> {
        require_elevated(actor, "list all alarms")?;
        Ok(self
            .collect_all(|rs, out: &mut Vec<Alarm>| out.extend(rs.alarms.iter().cloned()))
            .await)
    }
}

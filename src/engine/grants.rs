use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::GRANTS_OUT_OF_RANGE_TOTAL;

use super::nesting::{check_nested, check_window_in_stay};
use super::requests::normalize_days;
use super::{
    require_owner_or_elevated, AccessPatch, AlarmPatch, Engine, EngineError, Entity,
    NewAlarm, NewGuestAccess,
};

fn count_out_of_range(e: &EngineError) {
    if matches!(e, EngineError::OutOfRange { .. }) {
        metrics::counter!(GRANTS_OUT_OF_RANGE_TOTAL).increment(1);
    }
}

fn grants_on(rs: &RoomState, booking_id: Ulid) -> usize {
    rs.access.iter().filter(|a| a.booking_id == booking_id).count()
        + rs.alarms.iter().filter(|a| a.booking_id == booking_id).count()
}

fn owning_booking(rs: &RoomState, booking_id: Ulid) -> Result<&Booking, EngineError> {
    rs.booking(booking_id)
        .ok_or(EngineError::NotFound(Entity::Booking, booking_id))
}

impl Engine {
    // ── Guest access ─────────────────────────────────────────────

    pub async fn grant_access(
        &self,
        actor: &Actor,
        req: NewGuestAccess,
    ) -> Result<GuestAccess, EngineError> {
        let window = req.validate()?;
        let mut guard = self.resolve_entity_write(Entity::Booking, req.booking_id).await?;
        let reservation = self.reserve_id(req.id, guard.id)?;
        let booking = owning_booking(&guard, req.booking_id)?;
        check_nested(actor, booking, &window).inspect_err(count_out_of_range)?;
        let primary_guest_id = booking.user_id;
        if grants_on(&guard, req.booking_id) >= MAX_GRANTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many grants on booking"));
        }

        let access = GuestAccess {
            id: req.id,
            booking_id: req.booking_id,
            primary_guest_id,
            shared_with_user_id: req.shared_with_user_id,
            shared_with_contact: req.shared_with_contact,
            room_id: guard.id,
            window,
            temporary_key: req.temporary_key,
            active: true,
        };
        self.persist_and_apply(&mut guard, &Event::AccessGranted(access.clone()))
            .await?;
        reservation.commit();
        Ok(access)
    }

    pub async fn revise_access(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: AccessPatch,
    ) -> Result<GuestAccess, EngineError> {
        patch.validate()?;
        let mut guard = self.resolve_entity_write(Entity::GuestAccess, id).await?;
        let current = guard
            .access(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::GuestAccess, id))?;
        require_owner_or_elevated(actor, current.primary_guest_id, "edit another guest's access")?;
        let next = patch.apply_to(&current)?;
        if patch.moves_window() {
            let booking = owning_booking(&guard, current.booking_id)?;
            check_window_in_stay(booking, &next.window).inspect_err(count_out_of_range)?;
        }

        self.persist_and_apply(&mut guard, &Event::AccessRevised(next.clone()))
            .await?;
        Ok(next)
    }

    /// Turning a permission back on re-checks its booking: nothing hanging
    /// off a cancelled or finished stay can be re-activated.
    pub async fn set_access_active(
        &self,
        actor: &Actor,
        id: Ulid,
        active: bool,
    ) -> Result<GuestAccess, EngineError> {
        let mut guard = self.resolve_entity_write(Entity::GuestAccess, id).await?;
        let mut next = guard
            .access(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::GuestAccess, id))?;
        require_owner_or_elevated(actor, next.primary_guest_id, "toggle another guest's access")?;
        if active {
            check_window_in_stay(owning_booking(&guard, next.booking_id)?, &next.window)?;
        }
        next.active = active;

        self.persist_and_apply(&mut guard, &Event::AccessRevised(next.clone()))
            .await?;
        Ok(next)
    }

    pub async fn revoke_access(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(Entity::GuestAccess, id).await?;
        let owner = guard
            .access(id)
            .map(|a| a.primary_guest_id)
            .ok_or(EngineError::NotFound(Entity::GuestAccess, id))?;
        require_owner_or_elevated(actor, owner, "revoke another guest's access")?;

        let event = Event::AccessRevoked { id, room_id: guard.id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Alarms ───────────────────────────────────────────────────

    /// Without an explicit effective window the alarm runs for the whole stay.
    pub async fn set_alarm(&self, actor: &Actor, req: NewAlarm) -> Result<Alarm, EngineError> {
        let explicit = req.validate()?;
        let mut guard = self.resolve_entity_write(Entity::Booking, req.booking_id).await?;
        let reservation = self.reserve_id(req.id, guard.id)?;
        let booking = owning_booking(&guard, req.booking_id)?;
        let window = explicit.unwrap_or(booking.stay);
        check_nested(actor, booking, &window).inspect_err(count_out_of_range)?;
        let user_id = booking.user_id;
        if grants_on(&guard, req.booking_id) >= MAX_GRANTS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many grants on booking"));
        }

        let alarm = Alarm {
            id: req.id,
            booking_id: req.booking_id,
            user_id,
            room_id: guard.id,
            time: req.time,
            days: normalize_days(req.days),
            active: true,
            label: req.label,
            music: req.music,
            scenario: req.scenario,
            window,
        };
        self.persist_and_apply(&mut guard, &Event::AlarmSet(alarm.clone()))
            .await?;
        reservation.commit();
        tracing::debug!(alarm = %alarm.id, time = %alarm.time, "alarm set");
        Ok(alarm)
    }

    pub async fn revise_alarm(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: AlarmPatch,
    ) -> Result<Alarm, EngineError> {
        patch.validate()?;
        let mut guard = self.resolve_entity_write(Entity::Alarm, id).await?;
        let current = guard
            .alarm(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Alarm, id))?;
        require_owner_or_elevated(actor, current.user_id, "edit another guest's alarm")?;
        let next = patch.apply_to(&current)?;
        if patch.moves_window() {
            let booking = owning_booking(&guard, current.booking_id)?;
            check_window_in_stay(booking, &next.window).inspect_err(count_out_of_range)?;
        }

        self.persist_and_apply(&mut guard, &Event::AlarmRevised(next.clone()))
            .await?;
        Ok(next)
    }

    pub async fn set_alarm_active(
        &self,
        actor: &Actor,
        id: Ulid,
        active: bool,
    ) -> Result<Alarm, EngineError> {
        let mut guard = self.resolve_entity_write(Entity::Alarm, id).await?;
        let mut next = guard
            .alarm(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Alarm, id))?;
        require_owner_or_elevated(actor, next.user_id, "toggle another guest's alarm")?;
        if active {
            check_window_in_stay(owning_booking(&guard, next.booking_id)?, &next.window)?;
        }
        next.active = active;

        self.persist_and_apply(&mut guard, &Event::AlarmRevised(next.clone()))
            .await?;
        Ok(next)
    }

    pub async fn remove_alarm(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_entity_write(Entity::Alarm, id).await?;
        let owner = guard
            .alarm(id)
            .map(|a| a.user_id)
            .ok_or(EngineError::NotFound(Entity::Alarm, id))?;
        require_owner_or_elevated(actor, owner, "remove another guest's alarm")?;

        let event = Event::AlarmRemoved { id, room_id: guard.id };
        self.persist_and_apply(&mut guard, &event).await
    }
}

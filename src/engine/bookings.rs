use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    ADMIN_OVERRIDES_TOTAL, BOOKINGS_CREATED_TOTAL, BOOKING_CONFLICTS_TOTAL,
    BOOKING_TRANSITIONS_TOTAL,
};

use super::conflict::{check_no_conflict, now_ms};
use super::nesting::check_dependents_in_stay;
use super::{
    require_elevated, require_owner_or_elevated, BookingPatch, Engine, EngineError, Entity,
    NewBooking, Transition,
};

impl Engine {
    /// Admit a new `confirmed` booking owned by the caller. The overlap check,
    /// the log append and the apply all run under the room's write lock, so
    /// of two racing overlapping requests exactly one wins.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        req: NewBooking,
    ) -> Result<Booking, EngineError> {
        let stay = req.validate()?;
        let mut guard = self.room_write(req.room_id).await?;
        let reservation = self.reserve_id(req.id, guard.id)?;
        if !guard.status.is_bookable() {
            return Err(EngineError::InvalidState {
                id: req.room_id,
                reason: "room is not available for booking",
            });
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        if let Err(e) = check_no_conflict(&guard, &stay, None) {
            metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: req.id,
            user_id: actor.user_id,
            room_id: req.room_id,
            stay,
            status: BookingStatus::Confirmed,
            total_price: req.total_price,
            special_requests: req.special_requests,
            created_at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &Event::BookingCreated(booking.clone()))
            .await?;
        reservation.commit();
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        tracing::debug!(booking = %booking.id, room = %booking.room_id, "booking confirmed");
        Ok(booking)
    }

    pub async fn check_in(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        require_elevated(actor, "check guests in")?;
        self.transition(actor, id, Transition::CheckIn).await
    }

    pub async fn check_out(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        require_elevated(actor, "check guests out")?;
        self.transition(actor, id, Transition::CheckOut).await
    }

    /// Cancelling also deactivates the booking's guest access and alarms,
    /// as part of the same logged event.
    pub async fn cancel(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(actor, id, Transition::Cancel).await
    }

    pub async fn apply_transition(
        &self,
        actor: &Actor,
        id: Ulid,
        action: Transition,
    ) -> Result<Booking, EngineError> {
        match action {
            Transition::CheckIn => self.check_in(actor, id).await,
            Transition::CheckOut => self.check_out(actor, id).await,
            Transition::Cancel => self.cancel(actor, id).await,
        }
    }

    async fn transition(
        &self,
        actor: &Actor,
        id: Ulid,
        action: Transition,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_entity_write(Entity::Booking, id).await?;
        let current = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        require_owner_or_elevated(actor, current.user_id, "change another guest's booking")?;
        if !action.allowed_from(current.status) {
            return Err(EngineError::InvalidTransition { id, from: current.status, action });
        }

        let event = Event::BookingTransitioned {
            id,
            room_id: guard.id,
            status: action.target(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "action" => action.as_str()).increment(1);
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }

    /// Administrative edit. Skips the lifecycle table but never the data
    /// invariants: the merged stay must be a valid window, must not overlap
    /// another live booking if the result is live, and must still contain
    /// every guest access and alarm window of the booking.
    pub async fn revise_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        require_elevated(actor, "revise bookings")?;
        patch.validate()?;
        let mut guard = self.resolve_entity_write(Entity::Booking, id).await?;
        let current = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        let next = patch.apply_to(&current)?;
        if next.is_live() {
            check_no_conflict(&guard, &next.stay, Some(id))?;
        }
        if next.stay != current.stay {
            check_dependents_in_stay(&guard, &next)?;
        }

        let event = Event::BookingRevised { booking: next.clone(), by: actor.user_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(ADMIN_OVERRIDES_TOTAL, "action" => "revise").increment(1);
        tracing::info!(
            target: "audit",
            booking = %id,
            by = %actor.user_id,
            role = actor.role.as_str(),
            from_status = current.status.as_str(),
            to_status = next.status.as_str(),
            check_in = next.stay.start,
            check_out = next.stay.end,
            "booking revised"
        );
        Ok(next)
    }

    /// Administrative hard delete. The booking's grants go with it.
    pub async fn delete_booking(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_elevated(actor, "delete bookings")?;
        let mut guard = self.resolve_entity_write(Entity::Booking, id).await?;
        let status = guard
            .booking(id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;

        let event = Event::BookingDeleted { id, room_id: guard.id, by: actor.user_id };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(ADMIN_OVERRIDES_TOTAL, "action" => "delete").increment(1);
        tracing::info!(
            target: "audit",
            booking = %id,
            by = %actor.user_id,
            role = actor.role.as_str(),
            status = status.as_str(),
            "booking deleted"
        );
        Ok(())
    }
}

use crate::model::*;

use super::EngineError;

/// A grant window must sit inside a live, not-yet-finished stay:
/// `check_in <= window.start < window.end <= check_out`.
/// The strict middle inequality is already guaranteed by `Span`.
pub(crate) fn check_window_in_stay(booking: &Booking, window: &Span) -> Result<(), EngineError> {
    match booking.status {
        BookingStatus::Cancelled => {
            return Err(EngineError::InvalidState {
                id: booking.id,
                reason: "booking is cancelled",
            });
        }
        BookingStatus::CheckedOut => {
            return Err(EngineError::InvalidState {
                id: booking.id,
                reason: "booking is already checked out",
            });
        }
        BookingStatus::Confirmed | BookingStatus::CheckedIn => {}
    }
    if !booking.stay.contains_span(window) {
        return Err(EngineError::OutOfRange {
            window: *window,
            stay: booking.stay,
        });
    }
    Ok(())
}

/// Creation check for guest access and alarms. Ownership comes first, so a
/// stranger learns nothing about the booking's dates.
pub(crate) fn check_nested(
    actor: &Actor,
    booking: &Booking,
    window: &Span,
) -> Result<(), EngineError> {
    if actor.user_id != booking.user_id {
        return Err(EngineError::Forbidden {
            user: actor.user_id,
            action: "create grants on another guest's booking",
        });
    }
    check_window_in_stay(booking, window)
}

/// Every guest access and alarm hanging off `booking` must still fit its
/// stay, whatever the grant's active flag.
pub(crate) fn check_dependents_in_stay(
    rs: &RoomState,
    booking: &Booking,
) -> Result<(), EngineError> {
    let windows = rs
        .access
        .iter()
        .filter(|a| a.booking_id == booking.id)
        .map(|a| (a.id, a.window))
        .chain(
            rs.alarms
                .iter()
                .filter(|a| a.booking_id == booking.id)
                .map(|a| (a.id, a.window)),
        );
    for (grant, window) in windows {
        if !booking.stay.contains_span(&window) {
            tracing::debug!(booking = %booking.id, %grant, "grant would fall outside revised stay");
            return Err(EngineError::OutOfRange { window, stay: booking.stay });
        }
    }
    Ok(())
}

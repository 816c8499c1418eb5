use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Build a span from raw request bounds, rejecting empty/reversed or
/// out-of-range windows.
pub(crate) fn validate_window(
    field: &'static str,
    start: Ms,
    end: Ms,
    max_len: Ms,
) -> Result<Span, EngineError> {
    use crate::limits::*;
    if start >= end {
        return Err(EngineError::InvalidField {
            field,
            reason: "start must be before end",
        });
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if end - start > max_len {
        return Err(EngineError::LimitExceeded("window too wide"));
    }
    Ok(Span::new(start, end))
}

/// Fails with `Conflict` if any live booking on the room overlaps `span`.
/// `ignore` skips one booking (a booking being moved never conflicts with itself).
pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    for booking in rs.overlapping(span) {
        if Some(booking.id) == ignore || !booking.is_live() {
            continue;
        }
        return Err(EngineError::Conflict(booking.id));
    }
    Ok(())
}

/// Live booking spans inside `query`, clamped and sorted.
pub(crate) fn live_spans(rs: &RoomState, query: &Span) -> Vec<Span> {
    let mut spans: Vec<Span> = rs
        .overlapping(query)
        .filter(|b| b.is_live())
        .map(|b| Span::new(b.stay.start.max(query.start), b.stay.end.min(query.end)))
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with(stays: &[(Ms, Ms, BookingStatus)]) -> (RoomState, Vec<Ulid>) {
        let mut rs = RoomState::new(Ulid::new(), "7".into(), RoomStatus::Available);
        let mut ids = Vec::new();
        for &(start, end, status) in stays {
            let id = Ulid::new();
            ids.push(id);
            rs.insert_booking(Booking {
                id,
                user_id: Ulid::new(),
                room_id: rs.id,
                stay: Span::new(start, end),
                status,
                total_price: 100,
                special_requests: None,
                created_at: 0,
            });
        }
        (rs, ids)
    }

    #[test]
    fn overlap_with_live_booking_conflicts() {
        let (rs, ids) = room_with(&[(100, 200, BookingStatus::Confirmed)]);
        let err = check_no_conflict(&rs, &Span::new(150, 250), None).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(id) if id == ids[0]));
    }

    #[test]
    fn touching_boundary_is_fine() {
        let (rs, _) = room_with(&[(100, 200, BookingStatus::CheckedIn)]);
        assert!(check_no_conflict(&rs, &Span::new(200, 300), None).is_ok());
        assert!(check_no_conflict(&rs, &Span::new(50, 100), None).is_ok());
    }

    #[test]
    fn cancelled_bookings_do_not_block() {
        let (rs, _) = room_with(&[(100, 200, BookingStatus::Cancelled)]);
        assert!(check_no_conflict(&rs, &Span::new(100, 200), None).is_ok());
    }

    #[test]
    fn checked_out_bookings_still_block_their_window() {
        let (rs, _) = room_with(&[(100, 200, BookingStatus::CheckedOut)]);
        assert!(check_no_conflict(&rs, &Span::new(120, 130), None).is_err());
    }

    #[test]
    fn ignored_booking_is_skipped() {
        let (rs, ids) = room_with(&[(100, 200, BookingStatus::Confirmed)]);
        assert!(check_no_conflict(&rs, &Span::new(100, 300), Some(ids[0])).is_ok());
    }

    #[test]
    fn live_spans_are_clamped() {
        let (rs, _) = room_with(&[
            (0, 150, BookingStatus::Confirmed),
            (160, 170, BookingStatus::Cancelled),
            (180, 500, BookingStatus::Confirmed),
        ]);
        let spans = live_spans(&rs, &Span::new(100, 300));
        assert_eq!(spans, vec![Span::new(100, 150), Span::new(180, 300)]);
    }

    #[test]
    fn window_validation() {
        use crate::limits::*;
        let base = MIN_VALID_TIMESTAMP_MS;
        assert!(matches!(
            validate_window("stay", base + 10, base + 10, MAX_STAY_MS),
            Err(EngineError::InvalidField { field: "stay", .. })
        ));
        assert!(matches!(
            validate_window("stay", 0, 10, MAX_STAY_MS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_window("stay", base, base + MAX_STAY_MS + 1, MAX_STAY_MS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(
            validate_window("stay", base, base + 1, MAX_STAY_MS).unwrap(),
            Span::new(base, base + 1)
        );
    }
}

use crate::model::*;

use super::conflict::live_spans;

// ── Derived availability ─────────────────────────────────────────
//
// A room's occupancy is never stored. Everything here is computed from the
// room's live bookings at query time.

/// Free sub-windows of `query` on a room: the query minus every live stay.
/// A room that is out of service (maintenance, out of order, cleaning) has none.
pub fn free_windows(room: &RoomState, query: &Span) -> Vec<Span> {
    if !room.status.is_bookable() {
        return Vec::new();
    }
    let taken = merge_overlapping(&live_spans(room, query));
    subtract_intervals(&[*query], &taken)
}

/// The live booking whose stay covers `at`, if any.
pub fn occupant_at(room: &RoomState, at: Ms) -> Option<&Booking> {
    room.bookings
        .iter()
        .take_while(|b| b.stay.start <= at)
        .find(|b| b.is_live() && b.stay.contains_instant(at))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

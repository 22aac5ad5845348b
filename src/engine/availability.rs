use serde::Serialize;

use crate::model::*;

use super::conflict::{collect_conflicts, validate_guests, validate_stay};
use super::BookingError;

// ── Availability Query ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityResult {
    pub available: bool,
    /// Human-readable summary of the highest-priority rejection.
    pub reason: Option<String>,
    pub conflicting_ranges: Vec<DateRange>,
    #[serde(skip)]
    pub rejection: Option<BookingError>,
}

impl AvailabilityResult {
    fn accepted() -> Self {
        Self {
            available: true,
            reason: None,
            conflicting_ranges: Vec::new(),
            rejection: None,
        }
    }

    fn rejected(err: BookingError, conflicting_ranges: Vec<DateRange>) -> Self {
        Self {
            available: false,
            reason: Some(err.to_string()),
            conflicting_ranges,
            rejection: Some(err),
        }
    }

    pub fn into_result(self) -> Result<(), BookingError> {
        match self.rejection {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Decide whether `stay` can be booked in `room` given the room's committed
/// reservations.
///
/// Rejections by priority: invalid range > capacity exceeded > room
/// unavailable > date conflict. An ill-formed or past range returns before
/// any conflict scan; otherwise conflicts are always collected, even when
/// capacity already failed.
pub fn check(
    stay: &StayRequest,
    room: &RoomInfo,
    committed: &[CommittedReservation],
    today: CalendarDate,
) -> AvailabilityResult {
    let range = match validate_stay(stay, today) {
        Ok(range) => range,
        Err(e) => return AvailabilityResult::rejected(e, Vec::new()),
    };

    let capacity = validate_guests(stay.guests, room.capacity).err();
    let status = (!room.status.accepts_bookings()).then(|| BookingError::RoomUnavailable(room.status));
    let conflicts = collect_conflicts(room.id, &range, committed);

    let rejection = capacity
        .or(status)
        .or_else(|| (!conflicts.is_empty()).then(|| BookingError::DateConflict(conflicts.clone())));

    match rejection {
        Some(err) => AvailabilityResult::rejected(err, conflicts),
        None => AvailabilityResult::accepted(),
    }
}

// ── Range arithmetic ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start() <= last.end() {
                *last = DateRange::new_unchecked(last.start(), last.end().max(range.end()));
                continue;
            }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start();
        let current_end = b.end();

        while ri < to_remove.len() && to_remove[ri].end() <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start() < current_end {
            let r = &to_remove[j];
            if r.start() > current_start {
                result.push(DateRange::new_unchecked(current_start, r.start()));
            }
            current_start = current_start.max(r.end());
            j += 1;
        }

        if current_start < current_end {
            result.push(DateRange::new_unchecked(current_start, current_end));
        }
    }

    result
}

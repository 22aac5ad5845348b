use crate::limits::*;
use crate::model::*;

use super::BookingError;

/// Source of "today" for the not-in-the-past rule.
pub trait Clock: Send + Sync {
    fn today(&self) -> CalendarDate;
}

/// The hotel's local calendar date.
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> CalendarDate {
        chrono::Local::now().date_naive()
    }
}

pub struct FixedClock(pub CalendarDate);

impl Clock for FixedClock {
    fn today(&self) -> CalendarDate {
        self.0
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Well-formed range, not starting before today, within the stay limit.
/// Same-day check-in is allowed.
pub(crate) fn validate_stay(stay: &StayRequest, today: CalendarDate) -> Result<DateRange, BookingError> {
    let range = stay.range()?;
    if range.start() < today {
        return Err(BookingError::InvalidDateRange(format!(
            "check-in {} is in the past",
            range.start()
        )));
    }
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(BookingError::InvalidDateRange(format!(
            "stays are limited to {MAX_STAY_NIGHTS} nights"
        )));
    }
    Ok(range)
}

pub(crate) fn validate_guests(guests: u32, capacity: u32) -> Result<(), BookingError> {
    if guests == 0 || guests > capacity {
        return Err(BookingError::CapacityExceeded {
            requested: guests,
            capacity,
        });
    }
    Ok(())
}

pub(crate) fn validate_special_requests(text: Option<&str>) -> Result<(), BookingError> {
    if text.is_some_and(|t| t.len() > MAX_SPECIAL_REQUESTS_LEN) {
        return Err(BookingError::LimitExceeded("special requests too long"));
    }
    Ok(())
}

/// Ranges of blocking reservations on `room_id` that overlap `range`,
/// sorted by start. Reservations for other rooms are ignored.
pub fn collect_conflicts(
    room_id: RoomId,
    range: &DateRange,
    committed: &[CommittedReservation],
) -> Vec<DateRange> {
    let mut hits: Vec<DateRange> = committed
        .iter()
        .filter(|r| r.room_id == room_id && r.blocks() && r.range.overlaps(range))
        .map(|r| r.range)
        .collect();
    hits.sort();
    hits.dedup();
    hits
}

pub(crate) fn check_no_conflict(
    room_id: RoomId,
    range: &DateRange,
    committed: &[CommittedReservation],
) -> Result<(), BookingError> {
    let conflicts = collect_conflicts(room_id, range, committed);
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(BookingError::DateConflict(conflicts))
    }
}

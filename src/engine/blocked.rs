use std::collections::HashSet;

use crate::limits::MAX_SEARCH_WINDOW_DAYS;
use crate::model::*;

use super::availability::{merge_overlapping, subtract_ranges};
use super::BookingError;

/// Blocked calendar nights of one room, for live feedback while the guest
/// picks dates. Advisory only: the authoritative decision is
/// [`check`](super::check) against the full reservation list.
#[derive(Debug, Clone, Default)]
pub struct BlockedDateSet {
    dates: HashSet<CalendarDate>,
    /// Blocking ranges sorted by start.
    ranges: Vec<DateRange>,
}

impl BlockedDateSet {
    /// Index the blocking reservations of a snapshot.
    pub fn build(reservations: &[CommittedReservation]) -> Self {
        let mut ranges: Vec<DateRange> = reservations
            .iter()
            .filter(|r| r.blocks())
            .map(|r| r.range)
            .collect();
        ranges.sort();
        let dates = ranges.iter().flat_map(DateRange::days).collect();
        Self { dates, ranges }
    }

    /// Index a pre-expanded list of blocked nights.
    pub fn from_dates(dates: impl IntoIterator<Item = CalendarDate>) -> Self {
        let dates: HashSet<CalendarDate> = dates.into_iter().collect();
        let mut sorted: Vec<CalendarDate> = dates.iter().copied().collect();
        sorted.sort();
        let nights: Vec<DateRange> = sorted
            .iter()
            .filter_map(|d| d.succ_opt().map(|next| DateRange::new_unchecked(*d, next)))
            .collect();
        Self {
            dates,
            ranges: merge_overlapping(&nights),
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn is_blocked(&self, date: CalendarDate) -> bool {
        self.dates.contains(&date)
    }

    /// True if any night of `range` is blocked.
    pub fn is_range_blocked(&self, range: &DateRange) -> bool {
        if (self.dates.len() as i64) < range.nights() {
            self.dates.iter().any(|d| range.contains(*d))
        } else {
            range.days().any(|d| self.dates.contains(&d))
        }
    }

    pub fn blocking_ranges(&self) -> &[DateRange] {
        &self.ranges
    }

    /// Blocked nights from `today` on, ascending.
    pub fn upcoming(&self, today: CalendarDate) -> Vec<CalendarDate> {
        let mut dates: Vec<CalendarDate> = self.dates.iter().copied().filter(|d| *d >= today).collect();
        dates.sort();
        dates
    }

    /// Blocked nights as sorted, disjoint runs.
    pub fn blocked_runs(&self) -> Vec<DateRange> {
        merge_overlapping(&self.ranges)
    }

    /// Bookable runs of nights inside `window`.
    pub fn free_ranges(&self, window: &DateRange) -> Result<Vec<DateRange>, BookingError> {
        if window.nights() > MAX_SEARCH_WINDOW_DAYS {
            return Err(BookingError::LimitExceeded("search window too wide"));
        }
        Ok(subtract_ranges(&[*window], &self.blocked_runs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> CalendarDate {
        parse_calendar_date(s).unwrap()
    }

    fn r(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    fn res(id: ReservationId, a: &str, b: &str, status: ReservationStatus) -> CommittedReservation {
        CommittedReservation {
            id,
            room_id: 1,
            range: r(a, b),
            status,
        }
    }

    #[test]
    fn build_expands_blocking_reservations_only() {
        let set = BlockedDateSet::build(&[
            res(1, "2024-06-01", "2024-06-05", ReservationStatus::Confirmed),
            res(2, "2024-06-10", "2024-06-12", ReservationStatus::Cancelled),
            res(3, "2024-06-20", "2024-06-21", ReservationStatus::Completed),
            res(4, "2024-06-07", "2024-06-08", ReservationStatus::Pending),
        ]);
        assert_eq!(set.len(), 5);
        assert!(set.is_blocked(d("2024-06-01")));
        assert!(set.is_blocked(d("2024-06-04")));
        assert!(!set.is_blocked(d("2024-06-05"))); // checkout day
        assert!(set.is_blocked(d("2024-06-07")));
        assert!(!set.is_blocked(d("2024-06-10")));
        assert!(!set.is_blocked(d("2024-06-20")));
        assert_eq!(
            set.blocking_ranges(),
            &[r("2024-06-01", "2024-06-05"), r("2024-06-07", "2024-06-08")]
        );
    }

    #[test]
    fn range_blocked_respects_checkout_day() {
        let set = BlockedDateSet::build(&[res(1, "2024-01-10", "2024-01-15", ReservationStatus::Active)]);
        assert!(!set.is_range_blocked(&r("2024-01-15", "2024-01-20")));
        assert!(!set.is_range_blocked(&r("2024-01-05", "2024-01-10")));
        assert!(set.is_range_blocked(&r("2024-01-14", "2024-01-16")));
        assert!(set.is_range_blocked(&r("2024-01-01", "2024-02-01")));
    }

    #[test]
    fn both_lookup_strategies_agree() {
        // Few blocked nights vs. long range, and the reverse.
        let sparse = BlockedDateSet::from_dates([d("2024-03-15")]);
        assert!(sparse.is_range_blocked(&r("2024-01-01", "2024-12-31")));
        assert!(!sparse.is_range_blocked(&r("2024-03-16", "2024-12-31")));

        let dense = BlockedDateSet::build(&[res(1, "2024-01-01", "2024-12-31", ReservationStatus::Active)]);
        assert!(dense.is_range_blocked(&r("2024-03-15", "2024-03-16")));
        assert!(!dense.is_range_blocked(&r("2024-12-31", "2025-01-02")));
    }

    #[test]
    fn from_dates_merges_consecutive_nights() {
        let set = BlockedDateSet::from_dates([
            d("2024-06-03"),
            d("2024-06-01"),
            d("2024-06-02"),
            d("2024-06-02"),
            d("2024-06-09"),
        ]);
        assert_eq!(set.len(), 4);
        assert_eq!(
            set.blocked_runs(),
            vec![r("2024-06-01", "2024-06-04"), r("2024-06-09", "2024-06-10")]
        );
    }

    #[test]
    fn upcoming_drops_past_nights() {
        let set = BlockedDateSet::build(&[res(1, "2024-06-01", "2024-06-05", ReservationStatus::Active)]);
        assert_eq!(set.upcoming(d("2024-06-03")), vec![d("2024-06-03"), d("2024-06-04")]);
        assert!(set.upcoming(d("2024-06-05")).is_empty());
    }

    #[test]
    fn free_ranges_inside_window() {
        let set = BlockedDateSet::build(&[
            res(1, "2024-06-03", "2024-06-05", ReservationStatus::Confirmed),
            res(2, "2024-06-05", "2024-06-06", ReservationStatus::Pending),
            res(3, "2024-06-20", "2024-07-02", ReservationStatus::Active),
        ]);
        let free = set.free_ranges(&r("2024-06-01", "2024-06-30")).unwrap();
        assert_eq!(free, vec![r("2024-06-01", "2024-06-03"), r("2024-06-06", "2024-06-20")]);
    }

    #[test]
    fn free_ranges_window_limit() {
        let set = BlockedDateSet::default();
        let err = set.free_ranges(&r("2024-01-01", "2027-01-01")).unwrap_err();
        assert!(matches!(err, BookingError::LimitExceeded(_)));
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::BookingError;

/// Calendar date with no time of day and no timezone. The only date type.
pub type CalendarDate = NaiveDate;

/// Money in minor currency units.
pub type Cents = i64;

pub type RoomId = i64;
pub type GuestId = i64;
pub type ReservationId = i64;

/// Parse `YYYY-MM-DD`, or the date portion of an ISO datetime. The time and
/// offset (if any) are ignored rather than converted.
pub fn parse_calendar_date(raw: &str) -> Option<CalendarDate> {
    let date = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

// ── Date ranges ──────────────────────────────────────────────────

/// Half-open stay `[start, end)`: the occupied nights are `start..end`, and
/// `end` is checkout day, free for the next guest's check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct DateRange {
    start: CalendarDate,
    end: CalendarDate,
}

#[derive(Deserialize)]
struct RawRange {
    start: CalendarDate,
    end: CalendarDate,
}

impl TryFrom<RawRange> for DateRange {
    type Error = BookingError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    /// Fails with `InvalidRange` unless `end` is strictly after `start`.
    pub fn new(start: CalendarDate, end: CalendarDate) -> Result<Self, BookingError> {
        if end <= start {
            return Err(BookingError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// For bounds already known to satisfy `start < end`.
    pub(crate) fn new_unchecked(start: CalendarDate, end: CalendarDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    pub fn start(&self) -> CalendarDate {
        self.start
    }

    pub fn end(&self) -> CalendarDate {
        self.end
    }

    /// Number of occupied nights; always >= 1.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Touching ranges (one's end is the other's start) do not overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, date: CalendarDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Every occupied night in ascending order. Each call starts over.
    pub fn days(&self) -> Days {
        Days {
            next: Some(self.start),
            end: self.end,
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Iterator over the nights of a [`DateRange`].
#[derive(Debug, Clone)]
pub struct Days {
    next: Option<CalendarDate>,
    end: CalendarDate,
}

impl Iterator for Days {
    type Item = CalendarDate;

    fn next(&mut self) -> Option<CalendarDate> {
        let current = self.next.filter(|d| *d < self.end)?;
        self.next = current.succ_opt();
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self
            .next
            .map_or(0, |d| (self.end - d).num_days().max(0) as usize);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Days {}

// ── Labels ───────────────────────────────────────────────────────

/// Match a status label against its canonical spelling. Other casings are
/// accepted but reported, since the backend and its clients disagree on case.
fn match_label<T: Copy>(raw: &str, table: &[(&'static str, T)], what: &str) -> Result<T, BookingError> {
    if let Some((_, value)) = table.iter().find(|(label, _)| *label == raw) {
        return Ok(*value);
    }
    if let Some((label, value)) = table.iter().find(|(label, _)| label.eq_ignore_ascii_case(raw.trim())) {
        tracing::warn!(raw, canonical = *label, "non-canonical {what} spelling");
        return Ok(*value);
    }
    Err(BookingError::InvalidSnapshot(format!("unknown {what} {raw:?}")))
}

/// Reservation lifecycle. Closed set; the blocking subset is fixed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Active,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ];

    /// Statuses that hold nights against new bookings.
    pub const BLOCKING: [ReservationStatus; 3] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::Active,
    ];

    pub fn is_blocking(self) -> bool {
        Self::BLOCKING.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Active => "Active",
            ReservationStatus::Completed => "Completed",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table = Self::ALL.map(|st| (st.as_str(), st));
        match_label(s, &table, "reservation status")
    }
}

impl TryFrom<String> for ReservationStatus {
    type Error = BookingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Housekeeping state of a room, independent of its reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Available => "Available",
            RoomStatus::Occupied => "Occupied",
            RoomStatus::Maintenance => "Maintenance",
        }
    }

    /// Whether new stays may be sold. An occupied room is still bookable for
    /// later nights; the current stay is already an `Active` reservation.
    pub fn accepts_bookings(self) -> bool {
        !matches!(self, RoomStatus::Maintenance)
    }
}

impl FromStr for RoomStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table = [RoomStatus::Available, RoomStatus::Occupied, RoomStatus::Maintenance]
            .map(|st| (st.as_str(), st));
        match_label(s, &table, "room status")
    }
}

impl TryFrom<String> for RoomStatus {
    type Error = BookingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum RoomKind {
    Single,
    Double,
    Suite,
    Deluxe,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Single => "Single",
            RoomKind::Double => "Double",
            RoomKind::Suite => "Suite",
            RoomKind::Deluxe => "Deluxe",
        }
    }
}

impl FromStr for RoomKind {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let table = [RoomKind::Single, RoomKind::Double, RoomKind::Suite, RoomKind::Deluxe]
            .map(|k| (k.as_str(), k));
        match_label(s, &table, "room type")
    }
}

impl TryFrom<String> for RoomKind {
    type Error = BookingError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ── Rooms and reservations ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub number: String,
    pub kind: RoomKind,
    /// Max guests per stay.
    pub capacity: u32,
    pub price_per_night: Cents,
    pub status: RoomStatus,
}

/// A reservation the backend has accepted. Read-only snapshot input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedReservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub status: ReservationStatus,
}

impl CommittedReservation {
    pub fn blocks(&self) -> bool {
        self.status.is_blocking()
    }
}

/// Dates and party size being asked about. Dates are raw so that an
/// ill-formed selection can still be represented and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRequest {
    pub check_in: CalendarDate,
    pub check_out: CalendarDate,
    pub guests: u32,
}

impl StayRequest {
    pub fn range(&self) -> Result<DateRange, BookingError> {
        DateRange::new(self.check_in, self.check_out)
    }
}

/// Guest's draft before it is paid for and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedBooking {
    pub room_id: RoomId,
    pub check_in: CalendarDate,
    pub check_out: CalendarDate,
    pub guests: u32,
    pub special_requests: Option<String>,
}

impl ProposedBooking {
    pub fn stay(&self) -> StayRequest {
        StayRequest {
            check_in: self.check_in,
            check_out: self.check_out,
            guests: self.guests,
        }
    }

    pub fn range(&self) -> Result<DateRange, BookingError> {
        self.stay().range()
    }
}

/// Price presented to the guest and charged at payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub room_id: RoomId,
    pub range: DateRange,
    pub nights: i64,
    pub price_per_night: Cents,
    pub total: Cents,
    pub currency: String,
}

// ── Reconciliation records ───────────────────────────────────────

/// A payment that was captured but has no reservation behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedPayment {
    pub ticket: Ulid,
    pub attempt: Ulid,
    pub room_id: RoomId,
    pub guest_id: GuestId,
    pub range: DateRange,
    pub amount: Cents,
    pub currency: String,
    pub payment_reference: String,
    pub detail: String,
    /// Unix milliseconds.
    pub recorded_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Refunded,
    Rebooked,
    WrittenOff,
}

impl FromStr for Resolution {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "refunded" => Ok(Resolution::Refunded),
            "rebooked" => Ok(Resolution::Rebooked),
            "written-off" | "written_off" | "writtenoff" => Ok(Resolution::WrittenOff),
            other => Err(BookingError::NotFound(format!("resolution {other:?}"))),
        }
    }
}

/// Journal record format: flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    PaymentOrphaned(OrphanedPayment),
    Resolved {
        ticket: Ulid,
        resolution: Resolution,
        note: Option<String>,
        resolved_at: i64,
    },
}

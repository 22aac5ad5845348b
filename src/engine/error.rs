use ulid::Ulid;

use crate::model::{CalendarDate, DateRange, RoomStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    InvalidRange {
        start: CalendarDate,
        end: CalendarDate,
    },
    InvalidDateRange(String),
    CapacityExceeded {
        requested: u32,
        capacity: u32,
    },
    RoomUnavailable(RoomStatus),
    DateConflict(Vec<DateRange>),
    /// The backend refused the reservation after the payment was captured.
    PersistenceConflict {
        detail: String,
        ticket: Option<Ulid>,
    },
    PaymentCancelled,
    PaymentError(String),
    NetworkError(String),
    InvalidSnapshot(String),
    Busy,
    Cancelled,
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    NotFound(String),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl BookingError {
    /// Short stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidRange { .. } => "invalid_range",
            BookingError::InvalidDateRange(_) => "invalid_date_range",
            BookingError::CapacityExceeded { .. } => "capacity_exceeded",
            BookingError::RoomUnavailable(_) => "room_unavailable",
            BookingError::DateConflict(_) => "date_conflict",
            BookingError::PersistenceConflict { .. } => "persistence_conflict",
            BookingError::PaymentCancelled => "payment_cancelled",
            BookingError::PaymentError(_) => "payment_error",
            BookingError::NetworkError(_) => "network_error",
            BookingError::InvalidSnapshot(_) => "invalid_snapshot",
            BookingError::Busy => "busy",
            BookingError::Cancelled => "cancelled",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::NotFound(_) => "not_found",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::JournalError(_) => "journal_error",
        }
    }

    /// Detected before any money moves.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BookingError::InvalidRange { .. }
                | BookingError::InvalidDateRange(_)
                | BookingError::CapacityExceeded { .. }
                | BookingError::RoomUnavailable(_)
                | BookingError::DateConflict(_)
                | BookingError::NetworkError(_)
                | BookingError::InvalidSnapshot(_)
                | BookingError::LimitExceeded(_)
        )
    }

    /// A captured payment is left without a reservation.
    pub fn requires_reconciliation(&self) -> bool {
        matches!(self, BookingError::PersistenceConflict { .. })
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidRange { start, end } => {
                write!(f, "check-out ({end}) must be after check-in ({start})")
            }
            BookingError::InvalidDateRange(msg) => write!(f, "invalid dates: {msg}"),
            BookingError::CapacityExceeded { requested: 0, .. } => {
                write!(f, "at least one guest is required")
            }
            BookingError::CapacityExceeded { requested, capacity } => write!(
                f,
                "room holds at most {capacity} guests, {requested} requested"
            ),
            BookingError::RoomUnavailable(status) => {
                write!(f, "room is not accepting bookings (status: {status})")
            }
            BookingError::DateConflict(ranges) => {
                write!(f, "these dates are unavailable; already booked: ")?;
                for (i, r) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{r}")?;
                }
                Ok(())
            }
            BookingError::PersistenceConflict { detail, ticket } => {
                write!(f, "payment captured but reservation was rejected: {detail}")?;
                match ticket {
                    Some(t) => write!(f, " (reconciliation ticket {t})"),
                    None => write!(f, " (reconciliation ticket could not be recorded)"),
                }
            }
            BookingError::PaymentCancelled => write!(f, "payment cancelled"),
            BookingError::PaymentError(e) => write!(f, "payment failed: {e}"),
            BookingError::NetworkError(e) => {
                write!(f, "could not verify availability: {e}")
            }
            BookingError::InvalidSnapshot(e) => write!(f, "invalid reservation data: {e}"),
            BookingError::Busy => write!(f, "another request for this booking is in progress"),
            BookingError::Cancelled => write!(f, "booking step abandoned"),
            BookingError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            BookingError::NotFound(what) => write!(f, "not found: {what}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {}

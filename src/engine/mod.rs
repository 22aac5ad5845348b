//! Pure availability engine: no I/O, no shared state. Every function takes
//! the reservation snapshot it decides against.

mod availability;
mod blocked;
mod conflict;
mod error;
mod queries;

pub use availability::{check, merge_overlapping, subtract_ranges, AvailabilityResult};
pub use blocked::BlockedDateSet;
pub use conflict::{collect_conflicts, Clock, FixedClock, SystemClock};
pub use error::BookingError;
pub use queries::{quote, search_available_rooms, RoomSearch};

pub(crate) use conflict::{check_no_conflict, now_ms, validate_guests, validate_special_requests, validate_stay};

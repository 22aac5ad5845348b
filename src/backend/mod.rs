//! Boundary to the reservation backend. The backend owns the ledger and is
//! the final authority on every write; this crate only reads snapshots and
//! submits requests.

mod memory;
mod rest;

pub use memory::MemoryLedger;
pub use rest::RestBackend;

use async_trait::async_trait;

use crate::engine::BookingError;
use crate::model::*;
use crate::payment::PaymentReceipt;

#[async_trait]
pub trait ReservationSource: Send + Sync {
    async fn room(&self, room_id: RoomId) -> Result<RoomInfo, BookingError>;

    /// Every reservation on the room, any status. Must be fetched fresh for
    /// each decision.
    async fn reservations(&self, room_id: RoomId) -> Result<Vec<CommittedReservation>, BookingError>;

    /// Pre-expanded blocked nights. Only good enough for live feedback.
    async fn blocked_dates(&self, room_id: RoomId) -> Result<Vec<CalendarDate>, BookingError>;
}

/// Status a paid online booking is created with. The backend's blocked-dates
/// view only reports `Pending` and `Active` stays.
pub const PAID_BOOKING_STATUS: ReservationStatus = ReservationStatus::Active;

/// Paid booking submitted for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReservation {
    pub room_id: RoomId,
    pub guest_id: GuestId,
    pub range: DateRange,
    pub guests: u32,
    pub special_requests: Option<String>,
    pub total: Cents,
    pub receipt: PaymentReceipt,
}

#[async_trait]
pub trait ReservationSink: Send + Sync {
    /// Any error here is authoritative, even if a local check passed.
    async fn create(&self, request: &CreateReservation) -> Result<CommittedReservation, BookingError>;

    async fn send_confirmation(&self, reservation_id: ReservationId) -> Result<(), BookingError>;
}

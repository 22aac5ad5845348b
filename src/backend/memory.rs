use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::engine::{check_no_conflict, BookingError};
use crate::model::*;

use super::{CreateReservation, ReservationSink, ReservationSource, PAID_BOOKING_STATUS};

pub type SharedRoomLedger = Arc<RwLock<RoomLedger>>;

#[derive(Debug, Clone)]
pub struct RoomLedger {
    pub info: RoomInfo,
    /// All reservations on the room, sorted by `range.start`.
    pub reservations: Vec<CommittedReservation>,
}

impl RoomLedger {
    fn new(info: RoomInfo) -> Self {
        Self {
            info,
            reservations: Vec::new(),
        }
    }

    fn insert(&mut self, reservation: CommittedReservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.range.start(), |r| r.range.start())
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Reservations whose range overlaps `query`. Binary search skips
    /// everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &CommittedReservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.range.start() < query.end());
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.range.end() > query.start())
    }
}

/// In-process reservation ledger with an atomic check-and-insert, standing in
/// for the backend in tests and local runs.
pub struct MemoryLedger {
    rooms: DashMap<RoomId, SharedRoomLedger>,
    /// Reverse lookup: reservation id → room id
    reservation_to_room: DashMap<ReservationId, RoomId>,
    confirmations: DashMap<ReservationId, usize>,
    next_id: AtomicI64,
    offline: AtomicBool,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            reservation_to_room: DashMap::new(),
            confirmations: DashMap::new(),
            next_id: AtomicI64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    pub fn add_room(&self, info: RoomInfo) {
        self.rooms.insert(info.id, Arc::new(RwLock::new(RoomLedger::new(info))));
    }

    fn get_room(&self, room_id: RoomId) -> Result<SharedRoomLedger, BookingError> {
        self.rooms
            .get(&room_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| BookingError::NotFound(format!("room {room_id}")))
    }

    fn ensure_online(&self) -> Result<(), BookingError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(BookingError::NetworkError("backend unreachable".into()));
        }
        Ok(())
    }

    /// Simulate the backend becoming unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub async fn set_room_status(&self, room_id: RoomId, status: RoomStatus) -> Result<(), BookingError> {
        let room = self.get_room(room_id)?;
        room.write().await.info.status = status;
        Ok(())
    }

    /// Record a reservation made through another channel (front desk, another
    /// guest). Blocking statuses are conflict-checked under the room lock.
    pub async fn commit(
        &self,
        room_id: RoomId,
        range: DateRange,
        status: ReservationStatus,
    ) -> Result<CommittedReservation, BookingError> {
        let room = self.get_room(room_id)?;
        let mut guard = room.write().await;
        if status.is_blocking() {
            let overlapping: Vec<CommittedReservation> = guard.overlapping(&range).cloned().collect();
            check_no_conflict(room_id, &range, &overlapping)?;
        }
        let reservation = CommittedReservation {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            room_id,
            range,
            status,
        };
        guard.insert(reservation.clone());
        self.reservation_to_room.insert(reservation.id, room_id);
        Ok(reservation)
    }

    /// Change a reservation's status (cancel, check-out, ...).
    pub async fn set_status(&self, reservation_id: ReservationId, status: ReservationStatus) -> Result<(), BookingError> {
        let room_id = self
            .reservation_to_room
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or_else(|| BookingError::NotFound(format!("reservation {reservation_id}")))?;
        let room = self.get_room(room_id)?;
        let mut guard = room.write().await;
        let entry = guard
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation_id)
            .ok_or_else(|| BookingError::NotFound(format!("reservation {reservation_id}")))?;
        entry.status = status;
        Ok(())
    }

    pub fn confirmations_sent(&self, reservation_id: ReservationId) -> usize {
        self.confirmations.get(&reservation_id).map_or(0, |e| *e.value())
    }
}

#[async_trait]
impl ReservationSource for MemoryLedger {
    async fn room(&self, room_id: RoomId) -> Result<RoomInfo, BookingError> {
        self.ensure_online()?;
        let room = self.get_room(room_id)?;
        let guard = room.read().await;
        Ok(guard.info.clone())
    }

    async fn reservations(&self, room_id: RoomId) -> Result<Vec<CommittedReservation>, BookingError> {
        self.ensure_online()?;
        let room = self.get_room(room_id)?;
        let guard = room.read().await;
        Ok(guard.reservations.clone())
    }

    async fn blocked_dates(&self, room_id: RoomId) -> Result<Vec<CalendarDate>, BookingError> {
        self.ensure_online()?;
        let room = self.get_room(room_id)?;
        let guard = room.read().await;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| r.blocks())
            .flat_map(|r| r.range.days())
            .collect())
    }
}

#[async_trait]
impl ReservationSink for MemoryLedger {
    async fn create(&self, request: &CreateReservation) -> Result<CommittedReservation, BookingError> {
        self.ensure_online()?;
        self.commit(request.room_id, request.range, PAID_BOOKING_STATUS)
            .await
            .map_err(|e| match e {
                BookingError::DateConflict(_) => BookingError::PersistenceConflict {
                    detail: e.to_string(),
                    ticket: None,
                },
                other => other,
            })
    }

    async fn send_confirmation(&self, reservation_id: ReservationId) -> Result<(), BookingError> {
        self.ensure_online()?;
        if !self.reservation_to_room.contains_key(&reservation_id) {
            return Err(BookingError::NotFound(format!("reservation {reservation_id}")));
        }
        *self.confirmations.entry(reservation_id).or_insert(0) += 1;
        Ok(())
    }
}

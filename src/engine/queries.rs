use crate::model::*;

use super::error::BookingError;

use super::availability::check;

/// Price a validated range: `nights × price_per_night`.
pub fn quote(room: &RoomInfo, range: DateRange, currency: &str) -> Result<Quote, BookingError> {
    let nights = range.nights();
    let total = nights
        .checked_mul(room.price_per_night)
        .filter(|total| *total > 0)
        .ok_or(BookingError::LimitExceeded("stay total out of range"))?;
    Ok(Quote {
        room_id: room.id,
        range,
        nights,
        price_per_night: room.price_per_night,
        total,
        currency: currency.to_string(),
    })
}

/// Catalog search filters. `kind` and `min_capacity` narrow the rooms
/// before availability is checked.
#[derive(Debug, Clone)]
pub struct RoomSearch {
    pub stay: StayRequest,
    pub kind: Option<RoomKind>,
    pub min_capacity: Option<u32>,
}

/// Rooms in `catalog` that can take `search.stay`, cheapest first, then by
/// room number. Each room is checked against its own snapshot.
pub fn search_available_rooms<'a>(
    catalog: impl IntoIterator<Item = (&'a RoomInfo, &'a [CommittedReservation])>,
    search: &RoomSearch,
    today: CalendarDate,
) -> Vec<&'a RoomInfo> {
    let mut hits: Vec<&RoomInfo> = catalog
        .into_iter()
        .filter(|(room, _)| search.kind.is_none_or(|k| room.kind == k))
        .filter(|(room, _)| search.min_capacity.is_none_or(|c| room.capacity >= c))
        .filter(|(room, committed)| check(&search.stay, room, committed, today).available)
        .map(|(room, _)| room)
        .collect();
    hits.sort_by(|a, b| {
        a.price_per_night
            .cmp(&b.price_per_night)
            .then_with(|| a.number.cmp(&b.number))
    });
    hits
}

/// Longest stay accepted in a single booking.
pub const MAX_STAY_NIGHTS: i64 = 365;

pub const MAX_SPECIAL_REQUESTS_LEN: usize = 1_000;

/// Snapshots larger than this are refused rather than scanned.
pub const MAX_SNAPSHOT_RESERVATIONS: usize = 10_000;

/// Widest window for free-range and blocked-date listings.
pub const MAX_SEARCH_WINDOW_DAYS: i64 = 730;

/// Highest nightly rate accepted from the backend, in minor units.
pub const MAX_PRICE_PER_NIGHT: i64 = 100_000_000;

//! Hard ceilings. Requests beyond these are rejected before touching state.

pub const MAX_LISTINGS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_LISTING: usize = 100_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
/// Category, location value, image URL.
pub const MAX_FIELD_LEN: usize = 2_048;
pub const MAX_USER_ID_LEN: usize = 256;

/// Rooms, bathrooms, guests.
pub const MAX_COUNT: u32 = 1_000;
pub const MAX_PRICE_PER_NIGHT: i64 = 100_000_000;

pub const DEFAULT_MAX_STAY_NIGHTS: u32 = 365;

/// Longest request line accepted by the wire server.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Concurrent availability probes per search.
pub const SEARCH_PROBE_CONCURRENCY: usize = 32;

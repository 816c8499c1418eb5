use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_ROOMS: usize = 100_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;
pub const MAX_GRANTS_PER_BOOKING: usize = 64;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 2_000;
pub const MAX_CONTACT_LEN: usize = 254;
pub const MAX_LABEL_LEN: usize = 128;
pub const MAX_SCENARIO_NAME_LEN: usize = 64;
pub const MAX_URI_LEN: usize = 2_048;
/// Lighting/climate/curtain payloads and temporary keys.
pub const MAX_BLOB_LEN: usize = 16 * 1024;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
pub const MAX_STAY_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * DAY_MS;

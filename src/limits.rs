use crate::model::{DAY_MS, Ms};

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;
pub const MAX_IMAGES_PER_ROOM: usize = 32;
pub const MAX_CATALOG_ENTRIES: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4096;

/// 1970-01-01 .. 2200-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

pub const MAX_STAY_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 5 * 366 * DAY_MS;

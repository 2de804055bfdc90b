//! Hard bounds on inputs. Exceeding any of these is a `LimitExceeded`
//! error, not a panic.

use crate::model::Ms;

/// 2000-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_BATCH_LEN: usize = 64;

pub const MAX_TRIP_CAPACITY: u32 = 64;
pub const MAX_DIVES_PER_TRIP: usize = 8;
pub const MAX_DEPTH_M: u16 = 130;
pub const MAX_BOTTOM_TIME_MIN: u16 = 600;

/// Recreational nitrox band; personal records outside it are rejected.
pub const NITROX_MIN_PERCENT: u8 = 21;
pub const NITROX_MAX_PERCENT: u8 = 40;

/// Tank pressure ceiling in bar.
pub const MAX_TANK_PRESSURE_BAR: u16 = 350;

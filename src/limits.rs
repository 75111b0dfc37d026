use std::time::Duration;

use crate::model::Min;

pub const MAX_BUSINESSES: usize = 1024;
pub const MAX_BUSINESS_NAME_LEN: usize = 64;

pub const MAX_STAFF: usize = 512;
pub const MAX_WINDOWS_PER_DAY: usize = 16;
pub const MAX_BREAKS: usize = 4096;
pub const MAX_CLOSURES: usize = 8192;
pub const MAX_APPOINTMENTS_PER_DAY: usize = 4096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1024;

/// A service or step longer than a day can never fit a business window.
pub const MAX_SLOT_MINUTES: Min = 24 * 60;

pub const DEFAULT_STEP_MINUTES: Min = 30;
pub const DEFAULT_BOOKING_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

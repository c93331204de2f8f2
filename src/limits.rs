//! Hard limits. Requests beyond these are rejected with `LimitExceeded`.

/// Units per tenant.
pub const MAX_UNITS_PER_TENANT: usize = 100_000;

/// Events in one `update_calendar` / `remove_events` call.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Widest event or query range, in days (ten years).
pub const MAX_RANGE_DAYS: i64 = 3_660;

/// Supported calendar years.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9_999;

/// Unit name, in bytes.
pub const MAX_NAME_LEN: usize = 1_024;

/// Accepted states in one availability query.
pub const MAX_ACCEPTED_STATES: usize = 1_024;

pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_TENANTS: usize = 1_024;

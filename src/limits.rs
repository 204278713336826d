//! Hard caps on catalog size. Exceeding one yields `StoreError::LimitExceeded`.

pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_RESOURCE_GROUPS: usize = 10_000;
pub const MAX_ITERATIONS: usize = 10_000;
pub const MAX_REQUESTS_PER_ITERATION: usize = 500_000;
pub const MAX_GROUPS_PER_RESOURCE: usize = 64;
pub const MAX_NAME_LEN: usize = 255;
/// One year. Iterations are scheduling cycles, not calendars.
pub const MAX_ITERATION_DAYS: i64 = 366;

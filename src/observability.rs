//! Metric names. The library only records through the `metrics` facade;
//! installing an exporter is up to the host process.

/// Counter: booking attempts. Labels: outcome (booked, conflict, timeout).
pub const BOOKINGS_TOTAL: &str = "slotwise_bookings_total";

/// Histogram: time to aggregate constraints and generate one day's slots.
pub const SLOT_GENERATION_DURATION_SECONDS: &str = "slotwise_slot_generation_duration_seconds";

/// Gauge: number of open business engines.
pub const BUSINESSES_ACTIVE: &str = "slotwise_businesses_active";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotwise_wal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";


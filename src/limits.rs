/// Upper bound on the slot pool size.
pub const MAX_SLOTS: u32 = 10_000;

/// Longest accepted text cell (bytes).
pub const MAX_FIELD_LEN: usize = 4096;

/// Widest accepted "expiring soon" window, in days.
pub const MAX_ALERT_DAYS: u32 = 365;

/// Most rows a single INSERT may carry.
pub const MAX_BATCH_ROWS: usize = MAX_SLOTS as usize;

/// Slot capacity used when neither the environment nor the store names one.
pub const DEFAULT_SLOTS: u32 = 50;

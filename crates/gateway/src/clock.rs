use std::sync::atomic::{AtomicI64, Ordering};

/// Staleness threshold past which a signed request must re-sync against
/// the venue's server time before stamping its timestamp (spec.md §4.1
/// step 1: "If last time sync > 60s old...").
pub const MAX_CLOCK_AGE_MS: i64 = 60_000;

/// Tracks the local-clock offset from the venue's server time
/// (`server_time_ms - local_time_ms`), refreshed periodically so signed
/// requests stay inside the venue's `recvWindow`.
pub struct ClockSync {
    offset_ms: AtomicI64,
    /// `0` means "never synced", which `is_stale` always treats as stale.
    last_synced_at_ms: AtomicI64,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
            last_synced_at_ms: AtomicI64::new(0),
        }
    }

    pub fn set_offset(&self, offset_ms: i64) {
        self.offset_ms.store(offset_ms, Ordering::Relaxed);
        self.last_synced_at_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }

    /// Whether the last successful sync is more than `MAX_CLOCK_AGE_MS` old
    /// (or there has never been one).
    pub fn is_stale(&self) -> bool {
        let last = self.last_synced_at_ms.load(Ordering::Relaxed);
        if last == 0 {
            return true;
        }
        chrono::Utc::now().timestamp_millis() - last > MAX_CLOCK_AGE_MS
    }

    /// Current timestamp to stamp signed requests with, adjusted by the
    /// last-known offset.
    pub fn timestamp_ms(&self) -> i64 {
        let local = chrono::Utc::now().timestamp_millis();
        local + self.offset_ms()
    }
}

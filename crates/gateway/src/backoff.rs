use std::time::Duration;

use rand::Rng;

/// Jittered exponential backoff, doubling from `base` up to `max`, the same
/// growth the teacher's WebSocket reconnect loop uses — with full jitter
/// added so a fleet of gateways retrying together don't synchronize.
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Sleep for a jittered duration in `[0, current]`, then double `current`
    /// (capped at `max`).
    pub async fn wait(&mut self) {
        let jittered = {
            let mut rng = rand::thread_rng();
            Duration::from_millis(rng.gen_range(0..=self.current.as_millis() as u64))
        };
        tokio::time::sleep(jittered).await;
        self.current = (self.current * 2).min(self.max);
    }
}

/// Maximum number of retries for a signed/public REST call (spec.md §4.1:
/// "up to 3 times"). Does not cover the initial attempt.
pub const MAX_VENUE_RETRIES: u32 = 3;

/// Whether an HTTP status or venue error code warrants a retry (spec.md
/// §4.1: "retry on HTTP 429, 503, or venue codes -1003/-1006... Do not
/// retry on 401/403."), rather than surfacing immediately.
pub fn is_retryable(status: u16, venue_code: Option<i64>) -> bool {
    status == 429 || status == 503 || matches!(venue_code, Some(-1003) | Some(-1006))
}

/// The bit-exact retry delay from spec.md §4.1: `300*(attempt+1)ms +
/// uniform[0,200)ms`, where `attempt` is zero-based (0 on the first retry).
pub fn venue_retry_delay(attempt: u32) -> Duration {
    let base_ms = 300 * (attempt as u64 + 1);
    let jitter_ms = rand::thread_rng().gen_range(0..200u64);
    Duration::from_millis(base_ms + jitter_ms)
}

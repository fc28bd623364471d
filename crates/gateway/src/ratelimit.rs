use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

/// spec.md §4.1/§5: general-limiter concurrency and pacing caps.
const GENERAL_MAX_INFLIGHT: usize = 5;
const GENERAL_MIN_GAP: Duration = Duration::from_millis(50);

/// spec.md §4.1/§5: order-limiter concurrency and pacing caps — the basis
/// for "calls through the order limiter execute strictly in submission
/// order" (max in-flight = 1 serializes them).
const ORDER_MAX_INFLIGHT: usize = 1;
const ORDER_MIN_GAP: Duration = Duration::from_millis(100);

/// Fixed-window weight limiter matching the venue's `X-MBX-USED-WEIGHT-1M`
/// accounting: a budget of `limit` request-weight units that resets every
/// `window`. Requests that would exceed the budget wait for the window to
/// roll rather than being rejected — the gateway never surfaces a
/// rate-limit error the caller has to retry itself. Also enforces a
/// max-5-in-flight semaphore, a 50ms minimum gap between dispatches, and a
/// 60s halt window triggered by a 429 or venue code -1003 (spec.md §4.1).
pub struct WeightLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
    inflight: Arc<Semaphore>,
    last_dispatched_at: Mutex<Option<Instant>>,
    halted_until: Mutex<Option<Instant>>,
}

struct WindowState {
    used: u32,
    window_started_at: Instant,
}

impl WeightLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                used: 0,
                window_started_at: Instant::now(),
            }),
            inflight: Arc::new(Semaphore::new(GENERAL_MAX_INFLIGHT)),
            last_dispatched_at: Mutex::new(None),
            halted_until: Mutex::new(None),
        }
    }

    /// Reserve `weight` units and an in-flight slot, sleeping through any
    /// active halt, budget exhaustion, or minimum-gap pacing first. The
    /// returned permit must be held for the lifetime of the dispatched
    /// request (including its retries) and dropped once it completes.
    pub async fn acquire(&self, weight: u32) -> OwnedSemaphorePermit {
        self.wait_out_halt().await;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.window_started_at.elapsed();
                if elapsed >= self.window {
                    state.used = 0;
                    state.window_started_at = Instant::now();
                }
                if state.used + weight <= self.limit {
                    state.used += weight;
                    None
                } else {
                    Some(self.window - elapsed)
                }
            };
            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
        self.wait_out_min_gap().await;
        self.inflight
            .clone()
            .acquire_owned()
            .await
            .expect("weight limiter semaphore is never closed")
    }

    async fn wait_out_min_gap(&self) {
        let mut last = self.last_dispatched_at.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < GENERAL_MIN_GAP {
                tokio::time::sleep(GENERAL_MIN_GAP - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn wait_out_halt(&self) {
        loop {
            let remaining = {
                let halted = self.halted_until.lock().await;
                match *halted {
                    Some(until) if until > Instant::now() => Some(until - Instant::now()),
                    _ => None,
                }
            };
            match remaining {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Halt the general limiter for `duration` without dropping queued
    /// work (spec.md §4.1: a 429 or venue code -1003 halts it for 60s).
    pub async fn halt(&self, duration: Duration) {
        let mut halted = self.halted_until.lock().await;
        *halted = Some(Instant::now() + duration);
    }

    /// Record the venue's authoritative `used_weight` reading, replacing
    /// the locally tracked count so drift from other processes sharing the
    /// same API key self-corrects.
    pub async fn sync_used(&self, used_weight: u32) {
        let mut state = self.state.lock().await;
        state.used = used_weight;
    }
}

/// Per-second order-submission limiter (the venue's separate `orders`
/// rate limit, distinct from request weight). Also enforces the
/// max-1-in-flight / 100ms-minimum-gap pacing spec.md §4.1/§5 require for
/// order calls, which is what makes order submission strictly serialized.
pub struct OrderLimiter {
    max_per_second: u32,
    window_started_at: AtomicI64,
    count_in_window: Mutex<u32>,
    inflight: Arc<Semaphore>,
    last_dispatched_at: Mutex<Option<Instant>>,
}

impl OrderLimiter {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            window_started_at: AtomicI64::new(now_ms()),
            count_in_window: Mutex::new(0),
            inflight: Arc::new(Semaphore::new(ORDER_MAX_INFLIGHT)),
            last_dispatched_at: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        loop {
            let wait = {
                let mut count = self.count_in_window.lock().await;
                let started = self.window_started_at.load(Ordering::Relaxed);
                let elapsed = now_ms() - started;
                if elapsed >= 1000 {
                    self.window_started_at.store(now_ms(), Ordering::Relaxed);
                    *count = 0;
                }
                if *count < self.max_per_second {
                    *count += 1;
                    None
                } else {
                    Some(Duration::from_millis((1000 - elapsed).max(0) as u64))
                }
            };
            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d).await,
            }
        }

        {
            let mut last = self.last_dispatched_at.lock().await;
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < ORDER_MIN_GAP {
                    tokio::time::sleep(ORDER_MIN_GAP - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        self.inflight
            .clone()
            .acquire_owned()
            .await
            .expect("order limiter semaphore is never closed")
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

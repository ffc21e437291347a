//! Fixed one-minute window rate limiters.
//!
//! Windows are aligned to the wall clock (`unix_seconds / 60`), so a limit
//! of 5 allows at most 5 operations between `hh:mm:00` and `hh:mm:59`
//! regardless of when the first one happened.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Default)]
struct WindowState {
    window: i64,
    count: u32,
}

impl WindowState {
    fn roll(&mut self, now: DateTime<Utc>) {
        let window = minute_window(now);
        if window != self.window {
            self.window = window;
            self.count = 0;
        }
    }
}

/// Index of the wall-clock minute containing `now`.
pub fn minute_window(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(60)
}

/// Counts operations in the current wall-clock minute.
#[derive(Debug)]
pub struct MinuteWindowLimiter {
    limit: u32,
    state: Mutex<WindowState>,
}

impl MinuteWindowLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Check and count in one step. Returns `false` without counting when
    /// the window is full.
    pub async fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now()).await
    }

    pub async fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        state.roll(now);
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }

    /// Whether another operation would fit in the window containing `now`.
    pub async fn has_capacity_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        state.roll(now);
        state.count < self.limit
    }

    /// Count an operation that was already admitted by `has_capacity_at`.
    pub async fn record_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.roll(now);
        state.count = state.count.saturating_add(1);
    }

    /// Undo one `record_at(recorded_at)`. Does nothing once that window
    /// has rolled over.
    pub async fn unrecord_at(&self, recorded_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if state.window == minute_window(recorded_at) {
            state.count = state.count.saturating_sub(1);
        }
    }

    /// Operations counted in the window containing `now`.
    pub async fn count_at(&self, now: DateTime<Utc>) -> u32 {
        let mut state = self.state.lock().await;
        state.roll(now);
        state.count
    }
}

/// One [`MinuteWindowLimiter`] per key, created on first use.
#[derive(Debug)]
pub struct KeyedMinuteLimiter {
    limit: u32,
    limiters: RwLock<HashMap<String, Arc<MinuteWindowLimiter>>>,
}

impl KeyedMinuteLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Limiter for `key`. Keys never contend with each other.
    pub async fn limiter(&self, key: &str) -> Arc<MinuteWindowLimiter> {
        if let Some(limiter) = self.limiters.read().await.get(key) {
            return Arc::clone(limiter);
        }
        let mut limiters = self.limiters.write().await;
        Arc::clone(
            limiters
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(MinuteWindowLimiter::new(self.limit))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn test_limit_within_one_minute() {
        let limiter = MinuteWindowLimiter::new(5);
        for second in 0..5 {
            assert!(limiter.try_acquire_at(at(10, 0, second * 10)).await);
        }
        assert!(!limiter.try_acquire_at(at(10, 0, 59)).await);
        assert_eq!(limiter.count_at(at(10, 0, 59)).await, 5);
    }

    #[tokio::test]
    async fn test_window_resets_on_minute_boundary() {
        let limiter = MinuteWindowLimiter::new(1);
        assert!(limiter.try_acquire_at(at(10, 0, 59)).await);
        assert!(!limiter.try_acquire_at(at(10, 0, 59)).await);
        assert!(limiter.try_acquire_at(at(10, 1, 0)).await);
    }

    #[tokio::test]
    async fn test_check_then_record() {
        let limiter = MinuteWindowLimiter::new(2);
        let now = at(8, 30, 0);
        assert!(limiter.has_capacity_at(now).await);
        assert_eq!(limiter.count_at(now).await, 0);

        limiter.record_at(now).await;
        limiter.record_at(now).await;
        assert!(!limiter.has_capacity_at(now).await);
    }

    #[tokio::test]
    async fn test_unrecord_only_touches_its_own_window() {
        let limiter = MinuteWindowLimiter::new(1);
        limiter.record_at(at(8, 30, 10)).await;
        limiter.unrecord_at(at(8, 30, 10)).await;
        assert!(limiter.has_capacity_at(at(8, 30, 20)).await);

        limiter.record_at(at(8, 31, 5)).await;
        limiter.unrecord_at(at(8, 30, 50)).await;
        assert_eq!(limiter.count_at(at(8, 31, 6)).await, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let keyed = KeyedMinuteLimiter::new(1);
        let now = at(12, 0, 0);
        assert!(keyed.limiter("scan").await.try_acquire_at(now).await);
        assert!(!keyed.limiter("scan").await.try_acquire_at(now).await);
        assert!(keyed.limiter("build").await.try_acquire_at(now).await);
    }

    #[test]
    fn test_minute_window_before_epoch() {
        let before = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 30).unwrap();
        assert_eq!(minute_window(before), -1);
    }
}

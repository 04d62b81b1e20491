//! Fixed-window counter records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of the counter behind one `(scope, key)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No record exists yet.
    Absent,
    /// A record exists and its window is still open.
    Active,
    /// A record exists but its window has elapsed; the next increment reopens it.
    Expired,
}

/// Requests counted for one key within one fixed window.
///
/// Windows are fixed, not sliding: a burst straddling a boundary can see up
/// to twice the limit admitted in a short span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub count: u64,
}

impl CounterRecord {
    /// A record with an empty window opened at `now`.
    pub fn open(key: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            window_start: now,
            count: 0,
        }
    }

    /// When the current window closes.
    pub fn reset_at(&self, window: Duration) -> DateTime<Utc> {
        self.window_start + to_delta(window)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now >= self.reset_at(window)
    }

    /// Start a fresh window at `now` if the current one has elapsed.
    pub fn roll_if_expired(&mut self, now: DateTime<Utc>, window: Duration) {
        if self.is_expired(now, window) {
            self.window_start = now;
            self.count = 0;
        }
    }

    /// Add one request unless the window is already full. Never exceeds `limit`.
    pub fn try_admit(&mut self, limit: u64) -> bool {
        if self.count >= limit {
            return false;
        }
        self.count += 1;
        true
    }
}

/// Classify an optional record at `now`.
pub fn window_state(
    record: Option<&CounterRecord>,
    now: DateTime<Utc>,
    window: Duration,
) -> WindowState {
    match record {
        None => WindowState::Absent,
        Some(r) if r.is_expired(now, window) => WindowState::Expired,
        Some(_) => WindowState::Active,
    }
}

/// Convert a window length to a chrono delta. Policies cap windows well below
/// the range where millisecond precision could overflow.
pub(crate) fn to_delta(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(window.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MINUTE: Duration = Duration::from_secs(60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_admit_within_limit() {
        let mut record = CounterRecord::open("ip:1.2.3.4", t0());
        for _ in 0..5 {
            assert!(record.try_admit(5));
        }
        assert!(!record.try_admit(5));
        assert_eq!(record.count, 5);
    }

    #[test]
    fn test_count_saturates_at_limit() {
        let mut record = CounterRecord::open("k", t0());
        for _ in 0..100 {
            record.try_admit(3);
        }
        assert_eq!(record.count, 3);
    }

    #[test]
    fn test_window_states() {
        let record = CounterRecord::open("k", t0());
        assert_eq!(window_state(None, t0(), MINUTE), WindowState::Absent);
        assert_eq!(
            window_state(Some(&record), t0() + chrono::Duration::seconds(59), MINUTE),
            WindowState::Active
        );
        // the boundary instant belongs to the next window
        assert_eq!(
            window_state(Some(&record), t0() + chrono::Duration::seconds(60), MINUTE),
            WindowState::Expired
        );
    }

    #[test]
    fn test_roll_resets_expired_window() {
        let mut record = CounterRecord::open("k", t0());
        record.try_admit(10);
        record.try_admit(10);

        let later = t0() + chrono::Duration::seconds(90);
        record.roll_if_expired(later, MINUTE);
        assert_eq!(record.count, 0);
        assert_eq!(record.window_start, later);
        assert_eq!(record.reset_at(MINUTE), later + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_roll_keeps_active_window() {
        let mut record = CounterRecord::open("k", t0());
        record.try_admit(10);
        record.roll_if_expired(t0() + chrono::Duration::seconds(30), MINUTE);
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, t0());
    }
}

//! Posting quota accounting
//!
//! Tracks how many posts were made in the current fixed window. The window
//! starts at the first post after a reset and closes `window_length` later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Persisted form of a quota window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub count: u32,
    /// Unix timestamp (seconds) the window opened at
    pub window_start: i64,
}

#[derive(Debug, Clone)]
pub struct QuotaWindow {
    count: u32,
    window_start: DateTime<Utc>,
    window_length: Duration,
}

impl QuotaWindow {
    /// Create an empty window opening at `now`
    pub fn new(window_length: Duration, now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_length,
        }
    }

    /// Rebuild a window from persisted state
    ///
    /// A snapshot with an unrepresentable timestamp yields an empty window.
    pub fn restore(snapshot: QuotaSnapshot, window_length: Duration, now: DateTime<Utc>) -> Self {
        match DateTime::from_timestamp(snapshot.window_start, 0) {
            Some(window_start) if window_start <= now => Self {
                count: snapshot.count,
                window_start,
                window_length,
            },
            _ => Self::new(window_length, now),
        }
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            count: self.count,
            window_start: self.window_start.timestamp(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.window_start).to_std().unwrap_or(Duration::ZERO)
    }

    /// Reset the counter if the window has elapsed; returns whether it did
    pub fn roll(&mut self, now: DateTime<Utc>) -> bool {
        if self.elapsed(now) >= self.window_length {
            self.count = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Check whether another post fits in the window (rolling it first)
    pub fn has_capacity(&mut self, limit: u32, now: DateTime<Utc>) -> bool {
        self.roll(now);
        self.count < limit
    }

    /// Count a successful post
    pub fn record(&mut self, now: DateTime<Utc>) {
        if self.count == 0 {
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);
    }

    /// Time left until the current window closes
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.window_length.saturating_sub(self.elapsed(now))
    }

    pub fn resets_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.remaining(now))
            .map(|left| now + left)
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn test_allows_posts_under_limit() {
        let mut window = QuotaWindow::new(DAY, at(1_000_000));
        for _ in 0..10 {
            assert!(window.has_capacity(50, at(1_000_000)));
            window.record(at(1_000_000));
        }
        assert_eq!(window.count(), 10);
    }

    #[test]
    fn test_blocks_posts_over_limit() {
        let now = at(1_000_000);
        let mut window = QuotaWindow::new(DAY, now);

        for i in 0..5 {
            assert!(window.has_capacity(5, now), "Post {} should be allowed", i + 1);
            window.record(now);
        }

        assert!(!window.has_capacity(5, now), "Post 6 should be blocked");
    }

    #[test]
    fn test_window_resets_after_length() {
        let start = at(1_000_000);
        let mut window = QuotaWindow::new(DAY, start);
        for _ in 0..5 {
            window.record(start);
        }

        assert!(!window.has_capacity(5, start + chrono::Duration::seconds(100)));

        let later = start + chrono::Duration::seconds(24 * 3600);
        assert!(window.has_capacity(5, later), "Should be allowed in new window");
        assert_eq!(window.count(), 0);
        assert_eq!(window.window_start(), later);
    }

    #[test]
    fn test_window_opens_at_first_post() {
        let mut window = QuotaWindow::new(DAY, at(0));
        window.record(at(500));
        assert_eq!(window.window_start(), at(500));
        assert_eq!(window.remaining(at(600)), DAY - Duration::from_secs(100));
    }

    #[test]
    fn test_remaining_and_reset_time() {
        let start = at(1_000_000);
        let mut window = QuotaWindow::new(Duration::from_secs(3600), start);
        window.record(start);

        let now = start + chrono::Duration::seconds(600);
        assert_eq!(window.remaining(now), Duration::from_secs(3000));
        assert_eq!(window.resets_at(now), start + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let start = at(1_000_000);
        let mut window = QuotaWindow::new(DAY, start);
        window.record(start);
        window.record(start);

        let snapshot = window.snapshot();
        assert_eq!(snapshot, QuotaSnapshot { count: 2, window_start: 1_000_000 });

        let restored = QuotaWindow::restore(snapshot, DAY, start + chrono::Duration::seconds(10));
        assert_eq!(restored.count(), 2);
        assert_eq!(restored.window_start(), start);
    }

    #[test]
    fn test_restore_from_future_snapshot_starts_fresh() {
        let now = at(1_000_000);
        let snapshot = QuotaSnapshot { count: 40, window_start: 2_000_000 };
        let restored = QuotaWindow::restore(snapshot, DAY, now);
        assert_eq!(restored.count(), 0);
        assert_eq!(restored.window_start(), now);
    }
}

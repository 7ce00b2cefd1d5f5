//! Per-employee cooldown between accepted attendance events.
//!
//! The tracker is a plain service-scoped object: created once at startup and
//! handed to the decision engine, never a process-wide singleton. The current
//! time is always passed in by the caller, so tests drive it with a fixed
//! clock. State is in-memory only and lost on restart — a documented
//! limitation, acceptable because the worst case is one extra accepted event
//! right after a restart. Entries are never evicted (roster-scale map).

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownGate {
    Allowed,
    Blocked { remaining_secs: u64 },
}

/// Tracks the last *successful* check-in/check-out per employee code.
/// Enrollment, failed matches, and refused requests never update it.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_success: HashMap<String, NaiveDateTime>,
}

impl CooldownTracker {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            last_success: HashMap::new(),
        }
    }

    /// Gate a recognition event for `code` at time `now`.
    ///
    /// Blocked iff less than the window has elapsed since the last success.
    /// Elapsed exactly equal to the window is allowed. `remaining_secs` is
    /// the ceiling of the remaining time, so it is always >= 1 when blocked.
    pub fn check(&self, code: &str, now: NaiveDateTime) -> CooldownGate {
        let Some(&last) = self.last_success.get(code) else {
            return CooldownGate::Allowed;
        };

        let elapsed = now - last;
        if elapsed >= self.window {
            return CooldownGate::Allowed;
        }

        let remaining_ms = (self.window - elapsed).num_milliseconds().max(0);
        let remaining_secs = ((remaining_ms + 999) / 1000).max(1) as u64;
        CooldownGate::Blocked { remaining_secs }
    }

    /// Record a successful check-in or check-out at time `now`.
    pub fn record_success(&mut self, code: &str, now: NaiveDateTime) {
        self.last_success.insert(code.to_string(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + Duration::milliseconds(secs * 1000)
    }

    #[test]
    fn test_unknown_code_allowed() {
        let tracker = CooldownTracker::new(30);
        assert_eq!(tracker.check("E1", at(0)), CooldownGate::Allowed);
    }

    #[test]
    fn test_blocked_inside_window() {
        let mut tracker = CooldownTracker::new(30);
        tracker.record_success("E1", at(0));

        match tracker.check("E1", at(10)) {
            CooldownGate::Blocked { remaining_secs } => assert_eq!(remaining_secs, 20),
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_allowed_at_window_boundary() {
        let mut tracker = CooldownTracker::new(30);
        tracker.record_success("E1", at(0));
        // Exactly 30s elapsed: no longer blocked
        assert_eq!(tracker.check("E1", at(30)), CooldownGate::Allowed);
        assert_eq!(tracker.check("E1", at(31)), CooldownGate::Allowed);
    }

    #[test]
    fn test_remaining_is_ceiled_and_positive() {
        let mut tracker = CooldownTracker::new(30);
        tracker.record_success(
            "E1",
            NaiveDate::from_ymd_opt(2024, 6, 3)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        );
        // 29.5s elapsed -> 0.5s remaining, reported as 1
        let now = NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_milli_opt(9, 0, 29, 500)
            .unwrap();
        assert_eq!(
            tracker.check("E1", now),
            CooldownGate::Blocked { remaining_secs: 1 }
        );
    }

    #[test]
    fn test_remaining_never_increases() {
        let mut tracker = CooldownTracker::new(30);
        tracker.record_success("E1", at(0));

        let mut prev = u64::MAX;
        for elapsed in [1, 5, 12, 20, 29] {
            match tracker.check("E1", at(elapsed)) {
                CooldownGate::Blocked { remaining_secs } => {
                    assert!(remaining_secs <= prev, "remaining went up at {elapsed}s");
                    prev = remaining_secs;
                }
                CooldownGate::Allowed => panic!("should still be blocked at {elapsed}s"),
            }
        }
    }

    #[test]
    fn test_codes_are_independent() {
        let mut tracker = CooldownTracker::new(30);
        tracker.record_success("E1", at(0));
        assert_eq!(tracker.check("E2", at(1)), CooldownGate::Allowed);
    }
}

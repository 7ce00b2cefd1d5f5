//! Shift policy — pure wall-clock arithmetic for lateness and worked hours.
//!
//! All functions are deterministic given the policy configuration and the
//! timestamps passed in. Times are naive local wall-clock; timezone handling
//! is the deployment's responsibility.

use chrono::NaiveTime;
use thiserror::Error;

use crate::types::AttendanceStatus;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Check-out earlier than check-in on the same calendar day. Overnight
    /// shifts are unsupported; the request is rejected rather than producing
    /// a wrapped duration.
    #[error("check-out {check_out} is earlier than check-in {check_in}; overnight shifts are not supported")]
    CheckOutBeforeCheckIn {
        check_in: NaiveTime,
        check_out: NaiveTime,
    },
}

/// Business-hour configuration for a single shift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftPolicy {
    pub shift_start: NaiveTime,
    pub shift_end: NaiveTime,
    pub late_threshold_minutes: i64,
    pub standard_day_hours: f64,
}

impl Default for ShiftPolicy {
    fn default() -> Self {
        Self {
            shift_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            shift_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            late_threshold_minutes: 15,
            standard_day_hours: 8.0,
        }
    }
}

impl ShiftPolicy {
    /// Lateness and status for a check-in at `check_in`.
    pub fn evaluate_check_in(&self, check_in: NaiveTime) -> (i64, AttendanceStatus) {
        let late = lateness_minutes(check_in, self.shift_start);
        (late, status_for_lateness(late, self.late_threshold_minutes))
    }

    /// Worked and overtime hours for a completed day.
    pub fn evaluate_check_out(
        &self,
        check_in: NaiveTime,
        check_out: NaiveTime,
    ) -> Result<(f64, f64), PolicyError> {
        let worked = worked_hours(check_in, check_out)?;
        Ok((worked, overtime_hours(worked, self.standard_day_hours)))
    }
}

/// Whole minutes of lateness, truncated (14:59 past start is 14 minutes).
/// Zero when the check-in is at or before shift start.
pub fn lateness_minutes(check_in: NaiveTime, shift_start: NaiveTime) -> i64 {
    if check_in <= shift_start {
        0
    } else {
        (check_in - shift_start).num_minutes()
    }
}

/// `Late` strictly above the threshold; exactly at the threshold is `Present`.
pub fn status_for_lateness(minutes: i64, late_threshold: i64) -> AttendanceStatus {
    if minutes > late_threshold {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Elapsed hours between check-in and check-out on the same calendar day.
pub fn worked_hours(check_in: NaiveTime, check_out: NaiveTime) -> Result<f64, PolicyError> {
    if check_out < check_in {
        return Err(PolicyError::CheckOutBeforeCheckIn {
            check_in,
            check_out,
        });
    }
    Ok((check_out - check_in).num_seconds() as f64 / 3600.0)
}

/// Hours beyond the standard workday, floored at zero.
pub fn overtime_hours(worked: f64, standard_day_hours: f64) -> f64 {
    (worked - standard_day_hours).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_on_time_is_zero_lateness() {
        assert_eq!(lateness_minutes(t(7, 45, 0), t(8, 0, 0)), 0);
        assert_eq!(lateness_minutes(t(8, 0, 0), t(8, 0, 0)), 0);
    }

    #[test]
    fn test_lateness_truncates_seconds() {
        // 14:59 past start is 14 whole minutes, not 15
        assert_eq!(lateness_minutes(t(8, 14, 59), t(8, 0, 0)), 14);
        assert_eq!(lateness_minutes(t(8, 16, 0), t(8, 0, 0)), 16);
    }

    #[test]
    fn test_status_threshold_boundary() {
        // Exactly at the threshold is still present; one past is late
        assert_eq!(status_for_lateness(15, 15), AttendanceStatus::Present);
        assert_eq!(status_for_lateness(16, 15), AttendanceStatus::Late);
        assert_eq!(status_for_lateness(0, 15), AttendanceStatus::Present);
    }

    #[test]
    fn test_check_in_scenarios() {
        let policy = ShiftPolicy::default();

        let (late, status) = policy.evaluate_check_in(t(8, 14, 59));
        assert_eq!(late, 14);
        assert_eq!(status, AttendanceStatus::Present);

        let (late, status) = policy.evaluate_check_in(t(8, 16, 0));
        assert_eq!(late, 16);
        assert_eq!(status, AttendanceStatus::Late);
    }

    #[test]
    fn test_check_in_at_threshold_exactly() {
        let policy = ShiftPolicy::default();
        // shift_start + late_threshold exactly: 08:15:00 -> 15 minutes, present
        let (late, status) = policy.evaluate_check_in(t(8, 15, 0));
        assert_eq!(late, 15);
        assert_eq!(status, AttendanceStatus::Present);

        let (late, status) = policy.evaluate_check_in(t(8, 16, 0));
        assert_eq!(late, 16);
        assert_eq!(status, AttendanceStatus::Late);
    }

    #[test]
    fn test_worked_and_overtime() {
        let worked = worked_hours(t(8, 0, 0), t(17, 30, 0)).unwrap();
        assert!((worked - 9.5).abs() < 1e-9);
        assert!((overtime_hours(worked, 8.0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_negative_overtime() {
        assert_eq!(overtime_hours(6.0, 8.0), 0.0);
    }

    #[test]
    fn test_checkout_before_checkin_rejected() {
        let err = worked_hours(t(22, 0, 0), t(6, 0, 0)).unwrap_err();
        assert!(matches!(err, PolicyError::CheckOutBeforeCheckIn { .. }));
    }

    #[test]
    fn test_zero_length_day_allowed() {
        // Check-out at the same instant as check-in is zero hours, not an error
        assert_eq!(worked_hours(t(9, 0, 0), t(9, 0, 0)).unwrap(), 0.0);
    }

    #[test]
    fn test_evaluate_check_out() {
        let policy = ShiftPolicy::default();
        let (worked, overtime) = policy.evaluate_check_out(t(8, 0, 0), t(17, 30, 0)).unwrap();
        assert!((worked - 9.5).abs() < 1e-9);
        assert!((overtime - 1.5).abs() < 1e-9);
    }
}

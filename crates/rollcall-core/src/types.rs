use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Roster status of an employee. Only active employees are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmployeeStatus::Active => "active",
            EmployeeStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EmployeeStatus::Active),
            "inactive" => Some(EmployeeStatus::Inactive),
            _ => None,
        }
    }
}

/// An enrolled employee, keyed by employee code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub code: String,
    pub full_name: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub status: EmployeeStatus,
    /// Relative path of the current reference photo, if enrolled.
    pub face_photo: Option<String>,
}

/// Cached face embedding for one enrolled employee, as loaded from the roster.
///
/// The gallery snapshot handed to the matcher is a list of these.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub employee_code: String,
    pub embedding: Vec<f32>,
}

/// Per-day attendance status tag.
///
/// `Absent` rows are synthesized by an external daily rollup job; the
/// decision path only ever produces `Present` or `Late`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One attendance record per (employee, calendar date).
///
/// Created on first check-in of the day, mutated exactly once at check-out,
/// immutable afterward. The date is the server's local calendar date at
/// creation time and is never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub employee_code: String,
    pub date: NaiveDate,
    pub check_in: NaiveTime,
    pub check_out: Option<NaiveTime>,
    /// Whole minutes past shift start, truncated. Zero when on time.
    pub late_minutes: i64,
    pub status: AttendanceStatus,
    pub worked_hours: Option<f64>,
    pub overtime_hours: Option<f64>,
    pub check_in_photo: Option<String>,
    pub check_out_photo: Option<String>,
}

/// Monthly attendance aggregate for one employee.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthlyStats {
    pub present_days: i64,
    pub late_days: i64,
    pub absent_days: i64,
    pub total_hours: f64,
    pub total_overtime: f64,
}

/// Result of one attendance decision.
///
/// Exactly one of these is returned per submitted photo. Only `CheckedIn`
/// and `CheckedOut` have side effects (ledger write + cooldown update);
/// every other variant leaves all state untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Zero or multiple faces, low detection confidence, or undersized photo.
    NoFaceDetected { reason: String },
    /// No reference faces enrolled; the recognizer was never invoked.
    GalleryEmpty,
    /// Best candidate's distance exceeded the similarity threshold.
    NoMatch { best_distance: Option<f32> },
    /// Caller claimed one identity, the face matched another.
    IdentityMismatch { recognized: String, expected: String },
    /// Recognized employee is still inside the cooldown window.
    CooldownBlocked { remaining_secs: u64 },
    CheckedIn {
        record: AttendanceRecord,
        confidence: f32,
    },
    CheckedOut {
        record: AttendanceRecord,
        confidence: f32,
    },
    /// Both events already recorded today; a third visit changes nothing.
    AlreadyComplete { employee_code: String },
}

impl Outcome {
    /// True only for the two outcomes that recorded an attendance event.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::CheckedIn { .. } | Outcome::CheckedOut { .. })
    }
}

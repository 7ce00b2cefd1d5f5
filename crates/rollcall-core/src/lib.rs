//! rollcall-core — Attendance domain logic.
//!
//! Pure types and rules shared by the storage layer and the daemon:
//! shift/lateness/overtime policy, the per-employee cooldown tracker,
//! and the fixed set of attendance outcomes.

pub mod cooldown;
pub mod policy;
pub mod types;

pub use cooldown::{CooldownGate, CooldownTracker};
pub use policy::{PolicyError, ShiftPolicy};
pub use types::{
    AttendanceRecord, AttendanceStatus, Employee, EmployeeStatus, EnrolledFace, MonthlyStats,
    Outcome,
};

//! SQLite-backed roster and attendance ledger.
//!
//! A single [`Store`] owns the connection behind a mutex. Mutex poisoning
//! means another thread panicked mid-operation, which is unrecoverable here.

#![allow(clippy::missing_panics_doc)]

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use rollcall_core::policy::{PolicyError, ShiftPolicy};
use rollcall_core::types::{
    AttendanceRecord, AttendanceStatus, Employee, EmployeeStatus, EnrolledFace, MonthlyStats,
};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_FMT: &str = "%H:%M:%S";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown employee: {code}")]
    UnknownEmployee { code: String },

    /// A ledger operation was attempted out of order (double check-in,
    /// check-out without an open record, or a lost conflict race).
    #[error("invalid attendance transition: {0}")]
    InvalidTransition(String),

    /// A stats query named a month that does not exist. Caller input, not a
    /// ledger-ordering violation.
    #[error("invalid month {year}-{month:02}")]
    InvalidMonth { month: u32, year: i32 },

    /// Stored embedding for an employee could not be parsed.
    #[error("corrupt face embedding for employee {code}")]
    CorruptEmbedding { code: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Roster + attendance ledger over one SQLite database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // --- Roster ---

    /// Insert or update an employee. Enrollment state (photo, embedding) is
    /// left untouched on update.
    pub fn upsert_employee(&self, employee: &Employee) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO employees (code, full_name, department, position, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(code) DO UPDATE SET
                full_name = excluded.full_name,
                department = excluded.department,
                position = excluded.position,
                status = excluded.status",
            params![
                employee.code,
                employee.full_name,
                employee.department,
                employee.position,
                employee.status.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Fetch an employee by code if present and active.
    pub fn active_employee(&self, code: &str) -> Result<Option<Employee>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, full_name, department, position, status, face_photo
             FROM employees WHERE code = ?1 AND status = 'active'",
        )?;
        Ok(stmt.query_row([code], row_to_employee).optional()?)
    }

    /// All active employees with an enrolled reference photo.
    pub fn list_enrolled(&self) -> Result<Vec<Employee>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, full_name, department, position, status, face_photo
             FROM employees
             WHERE status = 'active' AND face_photo IS NOT NULL
             ORDER BY code",
        )?;
        let rows = stmt.query_map([], row_to_employee)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record a completed enrollment: reference photo path + cached embedding.
    pub fn set_face_photo(
        &self,
        code: &str,
        photo_path: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(embedding)
            .map_err(|_| StoreError::CorruptEmbedding { code: code.into() })?;
        let changed = self.conn().execute(
            "UPDATE employees SET face_photo = ?2, face_embedding = ?3 WHERE code = ?1",
            params![code, photo_path, json],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownEmployee { code: code.into() });
        }
        Ok(())
    }

    /// Gallery snapshot: (code, embedding) for every active enrolled employee.
    pub fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, face_embedding FROM employees
             WHERE status = 'active' AND face_embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut faces = Vec::new();
        for row in rows {
            let (code, json) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&json)
                .map_err(|_| StoreError::CorruptEmbedding { code: code.clone() })?;
            faces.push(EnrolledFace {
                employee_code: code,
                embedding,
            });
        }
        Ok(faces)
    }

    /// Number of enrolled reference faces. Zero means the gallery is empty
    /// and the recognizer must not be invoked.
    pub fn enrolled_count(&self) -> Result<i64, StoreError> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM employees
             WHERE status = 'active' AND face_embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // --- Attendance ledger ---

    /// Today's attendance record for an employee, if one exists.
    pub fn today_record(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
             WHERE employee_code = ?1 AND date = ?2"
        ))?;
        Ok(stmt
            .query_row(params![code, date.format(DATE_FMT).to_string()], row_to_record)
            .optional()?)
    }

    /// Create the day's record with check-in time, lateness, and status.
    ///
    /// Guarded by the (employee_code, date) uniqueness constraint: if a
    /// record already exists — including one created by a concurrent request
    /// that won the race — this fails with `InvalidTransition` and writes
    /// nothing.
    pub fn begin_check_in(
        &self,
        code: &str,
        date: NaiveDate,
        check_in: NaiveTime,
        photo: Option<&str>,
        policy: &ShiftPolicy,
    ) -> Result<AttendanceRecord, StoreError> {
        let (late_minutes, status) = policy.evaluate_check_in(check_in);

        let conn = self.conn();
        let changed = conn.execute(
            "INSERT INTO attendance
                (employee_code, date, check_in, late_minutes, status, check_in_photo)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(employee_code, date) DO NOTHING",
            params![
                code,
                date.format(DATE_FMT).to_string(),
                check_in.format(TIME_FMT).to_string(),
                late_minutes,
                status.as_str(),
                photo,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "attendance record already exists for {code} on {date}"
            )));
        }

        let id = conn.last_insert_rowid();
        tracing::info!(code, %date, late_minutes, status = status.as_str(), "check-in recorded");

        let mut stmt =
            conn.prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?1"))?;
        Ok(stmt.query_row([id], row_to_record)?)
    }

    /// Close the day's record with check-out time and derived hours.
    ///
    /// Only valid while the record's check-out is unset; the update is
    /// conditioned on `check_out IS NULL` so a concurrent double check-out
    /// loses cleanly.
    pub fn complete_check_out(
        &self,
        record_id: i64,
        check_out: NaiveTime,
        photo: Option<&str>,
        policy: &ShiftPolicy,
    ) -> Result<AttendanceRecord, StoreError> {
        let conn = self.conn();

        let mut stmt =
            conn.prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?1"))?;
        let record = stmt
            .query_row([record_id], row_to_record)
            .optional()?
            .ok_or_else(|| {
                StoreError::InvalidTransition(format!("no attendance record with id {record_id}"))
            })?;

        if record.check_out.is_some() {
            return Err(StoreError::InvalidTransition(format!(
                "attendance record {record_id} is already checked out"
            )));
        }

        let (worked, overtime) = policy.evaluate_check_out(record.check_in, check_out)?;

        let changed = conn.execute(
            "UPDATE attendance
             SET check_out = ?2, worked_hours = ?3, overtime_hours = ?4, check_out_photo = ?5
             WHERE id = ?1 AND check_out IS NULL",
            params![
                record_id,
                check_out.format(TIME_FMT).to_string(),
                worked,
                overtime,
                photo,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::InvalidTransition(format!(
                "attendance record {record_id} was checked out concurrently"
            )));
        }

        tracing::info!(
            code = record.employee_code,
            worked_hours = worked,
            overtime_hours = overtime,
            "check-out recorded"
        );

        let mut stmt =
            conn.prepare(&format!("SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE id = ?1"))?;
        Ok(stmt.query_row([record_id], row_to_record)?)
    }

    /// Monthly aggregate for one employee.
    pub fn monthly_stats(
        &self,
        code: &str,
        month: u32,
        year: i32,
    ) -> Result<MonthlyStats, StoreError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(StoreError::InvalidMonth { month, year })?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .expect("first of month is always valid");

        let stats = self.conn().query_row(
            "SELECT
                SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'late' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'absent' THEN 1 ELSE 0 END),
                SUM(COALESCE(worked_hours, 0.0)),
                SUM(COALESCE(overtime_hours, 0.0))
             FROM attendance
             WHERE employee_code = ?1 AND date >= ?2 AND date < ?3",
            params![
                code,
                first.format(DATE_FMT).to_string(),
                next.format(DATE_FMT).to_string(),
            ],
            |row| {
                Ok(MonthlyStats {
                    present_days: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                    late_days: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    absent_days: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    total_hours: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    total_overtime: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                })
            },
        )?;
        Ok(stats)
    }
}

const ATTENDANCE_COLUMNS: &str = "id, employee_code, date, check_in, check_out, late_minutes, \
     status, worked_hours, overtime_hours, check_in_photo, check_out_photo";

fn row_to_employee(row: &rusqlite::Row<'_>) -> rusqlite::Result<Employee> {
    let status: String = row.get(4)?;
    Ok(Employee {
        code: row.get(0)?,
        full_name: row.get(1)?,
        department: row.get(2)?,
        position: row.get(3)?,
        status: EmployeeStatus::parse(&status).unwrap_or(EmployeeStatus::Inactive),
        face_photo: row.get(5)?,
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let date: String = row.get(2)?;
    let check_in: String = row.get(3)?;
    let check_out: Option<String> = row.get(4)?;
    let status: String = row.get(6)?;

    Ok(AttendanceRecord {
        id: row.get(0)?,
        employee_code: row.get(1)?,
        date: parse_text(2, &date, DATE_FMT, NaiveDate::parse_from_str)?,
        check_in: parse_text(3, &check_in, TIME_FMT, NaiveTime::parse_from_str)?,
        check_out: check_out
            .map(|s| parse_text(4, &s, TIME_FMT, NaiveTime::parse_from_str))
            .transpose()?,
        late_minutes: row.get(5)?,
        status: AttendanceStatus::parse(&status).unwrap_or(AttendanceStatus::Present),
        worked_hours: row.get(7)?,
        overtime_hours: row.get(8)?,
        check_in_photo: row.get(9)?,
        check_out_photo: row.get(10)?,
    })
}

fn parse_text<T>(
    idx: usize,
    raw: &str,
    fmt: &str,
    parse: impl Fn(&str, &str) -> chrono::ParseResult<T>,
) -> rusqlite::Result<T> {
    parse(raw, fmt).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_employee(code: &str) -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_employee(&Employee {
                code: code.into(),
                full_name: "Test Person".into(),
                department: Some("Engineering".into()),
                position: None,
                status: EmployeeStatus::Active,
                face_photo: None,
            })
            .unwrap();
        store
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_check_in_creates_open_record() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();

        let rec = store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 5, 0), Some("E1/in.jpg"), &policy)
            .unwrap();

        assert_eq!(rec.employee_code, "E1");
        assert_eq!(rec.check_in, t(8, 5, 0));
        assert!(rec.check_out.is_none());
        assert!(rec.worked_hours.is_none());
        assert_eq!(rec.late_minutes, 5);
        assert_eq!(rec.status, AttendanceStatus::Present);
        assert_eq!(rec.check_in_photo.as_deref(), Some("E1/in.jpg"));

        let fetched = store.today_record("E1", d(2024, 6, 3)).unwrap().unwrap();
        assert_eq!(fetched.id, rec.id);
    }

    #[test]
    fn test_late_check_in_status() {
        let store = store_with_employee("E1");
        let rec = store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 20, 0), None, &ShiftPolicy::default())
            .unwrap();
        assert_eq!(rec.late_minutes, 20);
        assert_eq!(rec.status, AttendanceStatus::Late);
    }

    #[test]
    fn test_duplicate_check_in_is_invalid_transition() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();
        store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 0, 0), None, &policy)
            .unwrap();

        let err = store
            .begin_check_in("E1", d(2024, 6, 3), t(9, 0, 0), None, &policy)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));

        // Still exactly one row
        let rec = store.today_record("E1", d(2024, 6, 3)).unwrap().unwrap();
        assert_eq!(rec.check_in, t(8, 0, 0));
    }

    #[test]
    fn test_same_employee_different_days() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();
        store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 0, 0), None, &policy)
            .unwrap();
        store
            .begin_check_in("E1", d(2024, 6, 4), t(8, 0, 0), None, &policy)
            .unwrap();
    }

    #[test]
    fn test_check_out_computes_hours() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();
        let rec = store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 0, 0), None, &policy)
            .unwrap();

        let done = store
            .complete_check_out(rec.id, t(17, 30, 0), Some("E1/out.jpg"), &policy)
            .unwrap();

        assert_eq!(done.check_out, Some(t(17, 30, 0)));
        assert!((done.worked_hours.unwrap() - 9.5).abs() < 1e-9);
        assert!((done.overtime_hours.unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(done.check_out_photo.as_deref(), Some("E1/out.jpg"));
    }

    #[test]
    fn test_double_check_out_is_invalid_transition() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();
        let rec = store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 0, 0), None, &policy)
            .unwrap();
        store
            .complete_check_out(rec.id, t(17, 0, 0), None, &policy)
            .unwrap();

        let err = store
            .complete_check_out(rec.id, t(18, 0, 0), None, &policy)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[test]
    fn test_check_out_before_check_in_rejected() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();
        let rec = store
            .begin_check_in("E1", d(2024, 6, 3), t(22, 0, 0), None, &policy)
            .unwrap();

        let err = store
            .complete_check_out(rec.id, t(6, 0, 0), None, &policy)
            .unwrap_err();
        assert!(matches!(err, StoreError::Policy(_)));

        // Record remains open and unmodified
        let rec = store.today_record("E1", d(2024, 6, 3)).unwrap().unwrap();
        assert!(rec.check_out.is_none());
    }

    #[test]
    fn test_check_out_missing_record() {
        let store = store_with_employee("E1");
        let err = store
            .complete_check_out(999, t(17, 0, 0), None, &ShiftPolicy::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[test]
    fn test_enrollment_roundtrip() {
        let store = store_with_employee("E1");
        assert_eq!(store.enrolled_count().unwrap(), 0);
        assert!(store.enrolled_faces().unwrap().is_empty());

        store
            .set_face_photo("E1", "E1/E1.jpg", &[0.5, -0.25, 1.0])
            .unwrap();

        assert_eq!(store.enrolled_count().unwrap(), 1);
        let faces = store.enrolled_faces().unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].employee_code, "E1");
        assert_eq!(faces[0].embedding, vec![0.5, -0.25, 1.0]);

        let listed = store.list_enrolled().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].face_photo.as_deref(), Some("E1/E1.jpg"));
    }

    #[test]
    fn test_set_face_photo_unknown_employee() {
        let store = Store::open_in_memory().unwrap();
        let err = store.set_face_photo("NOPE", "x.jpg", &[0.0]).unwrap_err();
        assert!(matches!(err, StoreError::UnknownEmployee { .. }));
    }

    #[test]
    fn test_inactive_employee_excluded() {
        let store = store_with_employee("E1");
        store.set_face_photo("E1", "E1/E1.jpg", &[1.0]).unwrap();
        store
            .upsert_employee(&Employee {
                code: "E1".into(),
                full_name: "Test Person".into(),
                department: None,
                position: None,
                status: EmployeeStatus::Inactive,
                face_photo: None,
            })
            .unwrap();

        assert!(store.active_employee("E1").unwrap().is_none());
        assert_eq!(store.enrolled_count().unwrap(), 0);
        assert!(store.enrolled_faces().unwrap().is_empty());
    }

    #[test]
    fn test_monthly_stats_aggregation() {
        let store = store_with_employee("E1");
        let policy = ShiftPolicy::default();

        // Two present days (one closed), one late day in June
        let r1 = store
            .begin_check_in("E1", d(2024, 6, 3), t(8, 0, 0), None, &policy)
            .unwrap();
        store
            .complete_check_out(r1.id, t(17, 30, 0), None, &policy)
            .unwrap();
        store
            .begin_check_in("E1", d(2024, 6, 4), t(8, 30, 0), None, &policy)
            .unwrap();
        store
            .begin_check_in("E1", d(2024, 6, 5), t(8, 10, 0), None, &policy)
            .unwrap();
        // A July day that must not leak into June
        store
            .begin_check_in("E1", d(2024, 7, 1), t(8, 0, 0), None, &policy)
            .unwrap();

        let stats = store.monthly_stats("E1", 6, 2024).unwrap();
        assert_eq!(stats.present_days, 2);
        assert_eq!(stats.late_days, 1);
        assert_eq!(stats.absent_days, 0);
        assert!((stats.total_hours - 9.5).abs() < 1e-9);
        assert!((stats.total_overtime - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_stats_empty_month() {
        let store = store_with_employee("E1");
        let stats = store.monthly_stats("E1", 1, 2024).unwrap();
        assert_eq!(stats.present_days, 0);
        assert_eq!(stats.total_hours, 0.0);
    }

    #[test]
    fn test_monthly_stats_rejects_invalid_month() {
        let store = store_with_employee("E1");
        let err = store.monthly_stats("E1", 13, 2024).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidMonth {
                month: 13,
                year: 2024
            }
        ));

        let err = store.monthly_stats("E1", 0, 2024).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMonth { month: 0, .. }));
    }
}

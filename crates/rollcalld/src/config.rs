use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use rollcall_core::ShiftPolicy;
use rollcall_vision::DistanceMetric;

use crate::service::ServiceSettings;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// Root directory for photo storage (employee_photos/, attendance_photos/).
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Gallery distance metric.
    pub distance_metric: DistanceMetric,
    /// Distance threshold for a positive match (inclusive).
    pub similarity_threshold: f32,
    /// Seconds between accepted events for the same employee.
    pub cooldown_secs: u64,
    /// Minimum photo dimensions accepted for enrollment and attendance.
    pub min_photo_width: u32,
    pub min_photo_height: u32,
    /// Minimum face detection confidence.
    pub min_detection_confidence: f32,
    /// Timeout for one recognition round-trip to the vision thread.
    pub recognition_timeout_secs: u64,
    /// Shift window and lateness policy.
    pub shift_start: NaiveTime,
    pub shift_end: NaiveTime,
    pub late_threshold_minutes: i64,
    pub standard_day_hours: f64,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_vision::default_model_dir());

        let distance_metric = std::env::var("ROLLCALL_DISTANCE_METRIC")
            .ok()
            .and_then(|v| DistanceMetric::parse(&v))
            .unwrap_or_default();

        Self {
            bind_addr: std::env::var("ROLLCALL_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:5000".to_string()),
            data_dir,
            db_path,
            model_dir,
            distance_metric,
            similarity_threshold: env_f32("ROLLCALL_SIMILARITY_THRESHOLD", 0.40),
            cooldown_secs: env_u64("ROLLCALL_COOLDOWN_SECS", 30),
            min_photo_width: env_u32("ROLLCALL_MIN_PHOTO_WIDTH", 200),
            min_photo_height: env_u32("ROLLCALL_MIN_PHOTO_HEIGHT", 200),
            min_detection_confidence: env_f32("ROLLCALL_MIN_DETECTION_CONFIDENCE", 0.9),
            recognition_timeout_secs: env_u64("ROLLCALL_RECOGNITION_TIMEOUT_SECS", 10),
            shift_start: env_time("ROLLCALL_SHIFT_START", "08:00"),
            shift_end: env_time("ROLLCALL_SHIFT_END", "17:00"),
            late_threshold_minutes: env_u64("ROLLCALL_LATE_THRESHOLD_MINUTES", 15) as i64,
            standard_day_hours: env_f64("ROLLCALL_STANDARD_DAY_HOURS", 8.0),
        }
    }

    pub fn shift_policy(&self) -> ShiftPolicy {
        ShiftPolicy {
            shift_start: self.shift_start,
            shift_end: self.shift_end,
            late_threshold_minutes: self.late_threshold_minutes,
            standard_day_hours: self.standard_day_hours,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            similarity_threshold: self.similarity_threshold,
            cooldown_secs: self.cooldown_secs,
            min_photo_width: self.min_photo_width,
            min_photo_height: self.min_photo_height,
            min_detection_confidence: self.min_detection_confidence,
            recognition_timeout: Duration::from_secs(self.recognition_timeout_secs),
            policy: self.shift_policy(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_time(key: &str, default: &str) -> NaiveTime {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_time(&v))
        .unwrap_or_else(|| parse_time(default).expect("default shift time is valid"))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

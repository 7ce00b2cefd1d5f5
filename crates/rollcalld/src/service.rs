//! Attendance decision service.
//!
//! One entry point per API operation, with [`AttendanceService::decide_at`]
//! carrying the whole recognition pipeline: photo screening, gallery match,
//! identity hint, cooldown, then the day-record transition. Gates always run
//! in that order, and only the final two outcomes touch the ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

use rollcall_core::types::{Employee, MonthlyStats};
use rollcall_core::{CooldownGate, CooldownTracker, Outcome, ShiftPolicy};
use rollcall_store::{EventKind, GalleryError, GalleryStore, Store, StoreError};
use rollcall_vision::{
    BestMatch, DetectionReport, Embedding, GalleryEntry, VisionError,
};

use crate::engine::{EngineError, VisionHandle};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("recognition failed: {0}")]
    Recognition(String),
    #[error("recognition timed out")]
    RecognitionTimeout,
    #[error("unknown employee: {code}")]
    UnknownEmployee { code: String },
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Recognition capabilities the service consumes. Production wires in the
/// vision thread; tests substitute a scripted fake.
#[async_trait]
pub trait Vision: Send + Sync {
    async fn verify(&self, photo: Vec<u8>) -> Result<DetectionReport, EngineError>;
    async fn embed(&self, photo: Vec<u8>) -> Result<Embedding, EngineError>;
    async fn best_match(
        &self,
        photo: Vec<u8>,
        gallery: Vec<GalleryEntry>,
    ) -> Result<Option<BestMatch>, EngineError>;
}

#[async_trait]
impl Vision for VisionHandle {
    async fn verify(&self, photo: Vec<u8>) -> Result<DetectionReport, EngineError> {
        VisionHandle::verify(self, photo).await
    }

    async fn embed(&self, photo: Vec<u8>) -> Result<Embedding, EngineError> {
        VisionHandle::embed(self, photo).await
    }

    async fn best_match(
        &self,
        photo: Vec<u8>,
        gallery: Vec<GalleryEntry>,
    ) -> Result<Option<BestMatch>, EngineError> {
        VisionHandle::best_match(self, photo, gallery).await
    }
}

/// Tunables the service needs at decision time.
pub struct ServiceSettings {
    pub similarity_threshold: f32,
    pub cooldown_secs: u64,
    pub min_photo_width: u32,
    pub min_photo_height: u32,
    pub min_detection_confidence: f32,
    pub recognition_timeout: Duration,
    pub policy: ShiftPolicy,
}

/// Photo validity report for the standalone verify endpoint.
#[derive(Debug, Serialize)]
pub struct PhotoCheck {
    pub valid: bool,
    pub reason: Option<String>,
    #[serde(flatten)]
    pub report: DetectionReport,
}

/// Result of the recognize-only endpoint: who is this, with no side effects.
#[derive(Debug, Serialize)]
pub struct Identification {
    pub recognized: bool,
    pub employee_code: Option<String>,
    pub full_name: Option<String>,
    pub confidence: Option<f32>,
    pub best_distance: Option<f32>,
    pub reason: Option<String>,
}

impl Identification {
    fn rejected(reason: String) -> Self {
        Self {
            recognized: false,
            employee_code: None,
            full_name: None,
            confidence: None,
            best_distance: None,
            reason: Some(reason),
        }
    }

    fn unrecognized(best_distance: Option<f32>) -> Self {
        Self {
            recognized: false,
            employee_code: None,
            full_name: None,
            confidence: None,
            best_distance,
            reason: None,
        }
    }
}

pub struct AttendanceService {
    vision: Arc<dyn Vision>,
    store: Store,
    gallery: GalleryStore,
    settings: ServiceSettings,
    cooldown: Mutex<CooldownTracker>,
    /// Per-employee locks serializing the record transition. The map only
    /// ever grows, bounded by roster size.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AttendanceService {
    pub fn new(
        vision: Arc<dyn Vision>,
        store: Store,
        gallery: GalleryStore,
        settings: ServiceSettings,
    ) -> Self {
        let cooldown = Mutex::new(CooldownTracker::new(settings.cooldown_secs));
        Self {
            vision,
            store,
            gallery,
            settings,
            cooldown,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Decide attendance for a photo taken now.
    pub async fn decide(
        &self,
        photo: &[u8],
        expected: Option<&str>,
    ) -> Result<Outcome, ServiceError> {
        self.decide_at(photo, expected, Local::now().naive_local())
            .await
    }

    /// Full decision pipeline at an explicit time, so tests drive the clock.
    pub async fn decide_at(
        &self,
        photo: &[u8],
        expected: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Outcome, ServiceError> {
        let report = self.with_timeout(self.vision.verify(photo.to_vec())).await?;
        if let Err(reason) = self.screen(&report) {
            tracing::debug!(reason, "photo screening failed");
            return Ok(Outcome::NoFaceDetected { reason });
        }

        // The recognizer is never invoked against an empty gallery.
        if self.store.enrolled_count()? == 0 {
            return Ok(Outcome::GalleryEmpty);
        }

        let gallery = self.gallery_snapshot()?;
        let best = self
            .with_timeout(self.vision.best_match(photo.to_vec(), gallery))
            .await?;
        let Some(best) = best else {
            return Ok(Outcome::NoMatch {
                best_distance: None,
            });
        };
        if best.distance > self.settings.similarity_threshold {
            tracing::debug!(distance = best.distance, "best candidate above threshold");
            return Ok(Outcome::NoMatch {
                best_distance: Some(best.distance),
            });
        }

        let code = best.employee_code.clone();
        if let Some(expected) = expected {
            if expected != code {
                return Ok(Outcome::IdentityMismatch {
                    recognized: code,
                    expected: expected.to_string(),
                });
            }
        }

        // Gallery rows only come from active employees; a miss here means the
        // roster changed underneath the recognizer.
        self.store
            .active_employee(&code)?
            .ok_or_else(|| ServiceError::UnknownEmployee { code: code.clone() })?;

        let lock = self.code_lock(&code);
        let _guard = lock.lock().await;

        // Checked under the per-code lock: check-and-record is atomic, so of
        // two near-simultaneous submissions the loser sees the winner's
        // success and is blocked instead of completing the day.
        if let CooldownGate::Blocked { remaining_secs } =
            self.cooldown.lock().unwrap().check(&code, now)
        {
            return Ok(Outcome::CooldownBlocked { remaining_secs });
        }

        let confidence = best.confidence();
        let outcome = match self.store.today_record(&code, now.date())? {
            None => {
                let photo_path =
                    self.gallery
                        .save_event_photo(&code, EventKind::CheckIn, now, photo)?;
                let record = self.store.begin_check_in(
                    &code,
                    now.date(),
                    now.time(),
                    Some(&photo_path),
                    &self.settings.policy,
                )?;
                Outcome::CheckedIn { record, confidence }
            }
            Some(open) if open.check_out.is_none() => {
                let photo_path =
                    self.gallery
                        .save_event_photo(&code, EventKind::CheckOut, now, photo)?;
                let record = self.store.complete_check_out(
                    open.id,
                    now.time(),
                    Some(&photo_path),
                    &self.settings.policy,
                )?;
                Outcome::CheckedOut { record, confidence }
            }
            Some(_) => Outcome::AlreadyComplete {
                employee_code: code.clone(),
            },
        };

        if outcome.is_success() {
            self.cooldown.lock().unwrap().record_success(&code, now);
        }
        Ok(outcome)
    }

    /// Enroll a reference photo for an existing active employee.
    ///
    /// The photo is screened with the same gate as attendance photos, but a
    /// failure here is a request error rather than a decision outcome.
    /// Enrollment never touches the cooldown tracker.
    pub async fn enroll(&self, code: &str, photo: &[u8]) -> Result<Employee, ServiceError> {
        let employee = self
            .store
            .active_employee(code)?
            .ok_or_else(|| ServiceError::UnknownEmployee { code: code.into() })?;

        let report = self.with_timeout(self.vision.verify(photo.to_vec())).await?;
        if let Err(reason) = self.screen(&report) {
            return Err(ServiceError::Input(reason));
        }

        let embedding = self.with_timeout(self.vision.embed(photo.to_vec())).await?;
        let photo_path = self.gallery.enroll(code, photo)?;
        self.store.set_face_photo(code, &photo_path, &embedding.values)?;

        tracing::info!(code, "employee enrolled");
        Ok(Employee {
            face_photo: Some(photo_path),
            ..employee
        })
    }

    /// Screen a photo without deciding anything.
    pub async fn verify_photo(&self, photo: &[u8]) -> Result<PhotoCheck, ServiceError> {
        let report = self.with_timeout(self.vision.verify(photo.to_vec())).await?;
        let (valid, reason) = match self.screen(&report) {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        Ok(PhotoCheck {
            valid,
            reason,
            report,
        })
    }

    /// Identify the face in a photo. Same screening and matching as
    /// [`decide_at`](Self::decide_at) but stops before cooldown and ledger:
    /// no record, no event photo, no cooldown update.
    pub async fn identify(&self, photo: &[u8]) -> Result<Identification, ServiceError> {
        let report = self.with_timeout(self.vision.verify(photo.to_vec())).await?;
        if let Err(reason) = self.screen(&report) {
            return Ok(Identification::rejected(reason));
        }

        if self.store.enrolled_count()? == 0 {
            return Ok(Identification::unrecognized(None));
        }

        let gallery = self.gallery_snapshot()?;
        let best = self
            .with_timeout(self.vision.best_match(photo.to_vec(), gallery))
            .await?;
        match best {
            Some(best) if best.distance <= self.settings.similarity_threshold => {
                let employee = self
                    .store
                    .active_employee(&best.employee_code)?
                    .ok_or_else(|| ServiceError::UnknownEmployee {
                        code: best.employee_code.clone(),
                    })?;
                Ok(Identification {
                    recognized: true,
                    employee_code: Some(employee.code),
                    full_name: Some(employee.full_name),
                    confidence: Some(best.confidence()),
                    best_distance: Some(best.distance),
                    reason: None,
                })
            }
            Some(best) => Ok(Identification::unrecognized(Some(best.distance))),
            None => Ok(Identification::unrecognized(None)),
        }
    }

    /// Insert or update a roster entry. Does not affect enrollment.
    pub fn roster_upsert(&self, employee: &Employee) -> Result<(), ServiceError> {
        self.store.upsert_employee(employee)?;
        Ok(())
    }

    /// Active employees with an enrolled reference photo.
    pub fn employees(&self) -> Result<Vec<Employee>, ServiceError> {
        Ok(self.store.list_enrolled()?)
    }

    pub fn enrolled_count(&self) -> Result<i64, ServiceError> {
        Ok(self.store.enrolled_count()?)
    }

    /// Monthly aggregate for one employee.
    pub fn stats(&self, code: &str, month: u32, year: i32) -> Result<MonthlyStats, ServiceError> {
        self.store
            .active_employee(code)?
            .ok_or_else(|| ServiceError::UnknownEmployee { code: code.into() })?;
        Ok(self.store.monthly_stats(code, month, year)?)
    }

    /// Photo screening gate, shared by attendance, enrollment, and the
    /// standalone verify endpoint. Returns the rejection reason.
    fn screen(&self, report: &DetectionReport) -> Result<(), String> {
        let s = &self.settings;
        if report.width < s.min_photo_width || report.height < s.min_photo_height {
            return Err(format!(
                "photo too small: {}x{} (minimum {}x{})",
                report.width, report.height, s.min_photo_width, s.min_photo_height
            ));
        }
        match report.face_count {
            0 => Err("no face detected".to_string()),
            1 if report.confidence < s.min_detection_confidence => Err(format!(
                "detection confidence {:.2} below minimum {:.2}",
                report.confidence, s.min_detection_confidence
            )),
            1 => Ok(()),
            n => Err(format!("{n} faces detected; exactly one required")),
        }
    }

    fn gallery_snapshot(&self) -> Result<Vec<GalleryEntry>, ServiceError> {
        let entries = self
            .store
            .enrolled_faces()?
            .into_iter()
            .map(|face| GalleryEntry {
                employee_code: face.employee_code,
                embedding: Embedding {
                    values: face.embedding,
                    model_version: None,
                },
            })
            .collect();
        Ok(entries)
    }

    fn code_lock(&self, code: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(code.to_string())
            .or_default()
            .clone()
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, EngineError>>,
    ) -> Result<T, ServiceError> {
        match tokio::time::timeout(self.settings.recognition_timeout, fut).await {
            Ok(result) => result.map_err(map_engine_error),
            Err(_) => Err(ServiceError::RecognitionTimeout),
        }
    }
}

fn map_engine_error(err: EngineError) -> ServiceError {
    match err {
        EngineError::Vision(VisionError::Decode(msg)) => {
            ServiceError::Input(format!("could not decode photo: {msg}"))
        }
        other => ServiceError::Recognition(other.to_string()),
    }
}

//! HTTP API.
//!
//! Thin axum layer over [`AttendanceService`]: handlers decode the request,
//! call one service method, and serialize the result. All policy lives in the
//! service; this module only maps errors to status codes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use chrono::{Datelike, Local};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use rollcall_core::types::{Employee, EmployeeStatus};
use rollcall_store::StoreError;

use crate::service::{AttendanceService, ServiceError};

pub fn router(service: Arc<AttendanceService>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/enroll", post(enroll))
        .route("/api/attendance/check", post(check))
        .route("/api/recognize", post(recognize))
        .route("/api/attendance/stats/:code", get(stats))
        .route("/api/employees", get(list_employees).post(upsert_employee))
        .route("/api/verify-photo", post(verify_photo))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::Input(_)
            | ServiceError::Persistence(StoreError::InvalidMonth { .. }) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            ServiceError::UnknownEmployee { .. } => (StatusCode::NOT_FOUND, self.0.to_string()),
            ServiceError::Recognition(_) | ServiceError::Gallery(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.0.to_string())
            }
            ServiceError::RecognitionTimeout => {
                (StatusCode::GATEWAY_TIMEOUT, self.0.to_string())
            }
            ServiceError::Persistence(
                StoreError::Policy(_) | StoreError::InvalidTransition(_),
            ) => (StatusCode::CONFLICT, self.0.to_string()),
            ServiceError::Persistence(err) => {
                tracing::error!(error = %err, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
struct EnrollRequest {
    employee_code: String,
    /// Base64 (optionally a data URI) encoded image.
    photo: String,
}

#[derive(Deserialize)]
struct CheckRequest {
    photo: String,
    /// Optional identity hint; a mismatching recognition is refused.
    employee_code: Option<String>,
}

#[derive(Deserialize)]
struct VerifyRequest {
    photo: String,
}

#[derive(Deserialize)]
struct StatsQuery {
    month: Option<u32>,
    year: Option<i32>,
}

#[derive(Deserialize)]
struct RosterRequest {
    code: String,
    full_name: String,
    department: Option<String>,
    position: Option<String>,
    status: Option<EmployeeStatus>,
}

async fn health(State(service): State<Arc<AttendanceService>>) -> Result<Response, ApiError> {
    let enrolled = service.enrolled_count()?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "enrolled_count": enrolled,
    }))
    .into_response())
}

async fn enroll(
    State(service): State<Arc<AttendanceService>>,
    Json(req): Json<EnrollRequest>,
) -> Result<Response, ApiError> {
    let photo = decode_photo(&req.photo)?;
    let employee = service.enroll(&req.employee_code, &photo).await?;
    Ok(Json(employee).into_response())
}

async fn check(
    State(service): State<Arc<AttendanceService>>,
    Json(req): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let photo = decode_photo(&req.photo)?;
    let outcome = service.decide(&photo, req.employee_code.as_deref()).await?;
    Ok(Json(outcome).into_response())
}

async fn recognize(
    State(service): State<Arc<AttendanceService>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let photo = decode_photo(&req.photo)?;
    let identification = service.identify(&photo).await?;
    Ok(Json(identification).into_response())
}

async fn stats(
    State(service): State<Arc<AttendanceService>>,
    Path(code): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let today = Local::now().date_naive();
    let month = query.month.unwrap_or_else(|| today.month());
    let year = query.year.unwrap_or_else(|| today.year());
    let stats = service.stats(&code, month, year)?;
    Ok(Json(json!({
        "employee_code": code,
        "month": month,
        "year": year,
        "stats": stats,
    }))
    .into_response())
}

async fn list_employees(
    State(service): State<Arc<AttendanceService>>,
) -> Result<Response, ApiError> {
    let employees = service.employees()?;
    Ok(Json(employees).into_response())
}

async fn upsert_employee(
    State(service): State<Arc<AttendanceService>>,
    Json(req): Json<RosterRequest>,
) -> Result<Response, ApiError> {
    let employee = Employee {
        code: req.code,
        full_name: req.full_name,
        department: req.department,
        position: req.position,
        status: req.status.unwrap_or(EmployeeStatus::Active),
        face_photo: None,
    };
    service.roster_upsert(&employee)?;
    Ok((StatusCode::CREATED, Json(employee)).into_response())
}

async fn verify_photo(
    State(service): State<Arc<AttendanceService>>,
    Json(req): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let photo = decode_photo(&req.photo)?;
    let check = service.verify_photo(&photo).await?;
    Ok(Json(check).into_response())
}

/// Decode a base64 photo field, tolerating a `data:image/...;base64,` prefix.
fn decode_photo(field: &str) -> Result<Vec<u8>, ServiceError> {
    let payload = match field.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => field,
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ServiceError::Input(format!("invalid base64 photo: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_photo_plain_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"jpegbytes");
        assert_eq!(decode_photo(&encoded).unwrap(), b"jpegbytes");
    }

    #[test]
    fn test_decode_photo_data_uri() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"jpegbytes");
        let uri = format!("data:image/jpeg;base64,{encoded}");
        assert_eq!(decode_photo(&uri).unwrap(), b"jpegbytes");
    }

    #[test]
    fn test_decode_photo_rejects_garbage() {
        let err = decode_photo("%%not-base64%%").unwrap_err();
        assert!(matches!(err, ServiceError::Input(_)));
    }

    #[test]
    fn test_invalid_month_maps_to_bad_request() {
        let err = ApiError(ServiceError::Persistence(StoreError::InvalidMonth {
            month: 13,
            year: 2024,
        }));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_ledger_conflict_maps_to_conflict() {
        let err = ApiError(ServiceError::Persistence(StoreError::InvalidTransition(
            "already checked out".into(),
        )));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}

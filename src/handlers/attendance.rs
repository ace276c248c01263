//! Attendance HTTP handlers.
//!
//! This module implements the attendance API endpoints:
//! - POST /api/v1/attendance/check-in - Check in with GPS or QR evidence
//! - POST /api/v1/attendance/check-out - Check out, optionally with evidence
//! - POST /api/v1/attendance/breaks/start - Start a break
//! - POST /api/v1/attendance/breaks/end - End the open break
//! - POST /api/v1/attendance/cancel - Cancel a check-in within the grace window
//! - GET /api/v1/attendance/today - Today's state at a worksite
//! - GET /api/v1/attendance/history - Sessions in a date range
//! - GET /api/v1/attendance/:id - One session with its breaks
//!
//! Every operation acts on the authenticated caller. Sessions owned by other
//! users are reported as not found.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::attendance::{
        AttendanceResponse, CheckInRequest, CheckOutRequest, HistoryQuery, SessionDetailResponse,
        StartBreakRequest, TargetRequest, TodayQuery,
    },
    state::AppState,
};

/// Check in to a worksite.
///
/// # Endpoint
///
/// `POST /api/v1/attendance/check-in`
///
/// # Request Body
///
/// ```json
/// {
///   "business_id": "550e8400-e29b-41d4-a716-446655440000",
///   "evidence": { "method": "qr", "token": "eyJraWQiOi..." }
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the new session, status `CHECKED_IN`
/// - **Error (403)**: `GEOFENCE_VIOLATION` with distance details
/// - **Error (401)**: `TOKEN_*` when the QR token is rejected
/// - **Error (409)**: `ALREADY_CHECKED_IN` / `ALREADY_CHECKED_OUT`
/// - **Error (404)**: `WORKSITE_NOT_FOUND`
pub async fn check_in(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CheckInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .attendance
        .check_in(auth.user_id, request.business_id, request.evidence)
        .await?;

    Ok((StatusCode::CREATED, Json(AttendanceResponse::from(&snapshot))))
}

/// Check out and record the day's work duration.
///
/// # Request Body
///
/// ```json
/// {
///   "business_id": "550e8400-e29b-41d4-a716-446655440000",
///   "evidence": { "method": "gps", "latitude": 37.5665, "longitude": 126.9780 }
/// }
/// ```
///
/// `session_id` may be given instead of `business_id`. `evidence` is optional.
pub async fn check_out(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CheckOutRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let target = request.target.into_target()?;
    let snapshot = state
        .attendance
        .check_out(auth.user_id, target, request.evidence)
        .await?;

    Ok(Json(AttendanceResponse::from(&snapshot)))
}

/// Start a break. `break_type` is `normal` (default) or `lunch`.
pub async fn start_break(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<StartBreakRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let target = request.target.into_target()?;
    let snapshot = state
        .attendance
        .start_break(auth.user_id, target, request.break_type)
        .await?;

    Ok(Json(AttendanceResponse::from(&snapshot)))
}

pub async fn end_break(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TargetRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let target = request.into_target()?;
    let snapshot = state.attendance.end_break(auth.user_id, target).await?;

    Ok(Json(AttendanceResponse::from(&snapshot)))
}

/// Cancel a check-in made within the grace window.
///
/// # Response
///
/// - **Success (200 OK)**: status `NOT_CHECKED_IN` for the cancelled day
/// - **Error (409)**: `CANCELLATION_EXPIRED` with elapsed and grace seconds,
///   or `CANCELLATION_NOT_ALLOWED` once a break has been recorded
pub async fn cancel_check_in(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TargetRequest>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let target = request.into_target()?;
    let key = state.attendance.cancel_check_in(auth.user_id, target).await?;

    Ok(Json(AttendanceResponse::not_checked_in(
        key.business_id,
        key.work_date,
    )))
}

/// Today's attendance at a worksite.
///
/// `GET /api/v1/attendance/today?business_id=...`
pub async fn today(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TodayQuery>,
) -> Result<Json<AttendanceResponse>, AppError> {
    let response = state
        .attendance
        .today(auth.user_id, query.business_id)
        .await?;
    Ok(Json(response))
}

/// Sessions between two dates, inclusive, newest first.
///
/// `GET /api/v1/attendance/history?from=2025-03-01&to=2025-03-31&business_id=...`
///
/// The range may span at most 31 days. `business_id` is optional.
pub async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AttendanceResponse>>, AppError> {
    let sessions = state
        .attendance
        .history(auth.user_id, query.business_id, query.from, query.to)
        .await?;

    Ok(Json(sessions.iter().map(AttendanceResponse::from).collect()))
}

/// One session with its locations and break intervals.
///
/// # Security
///
/// Returns 404 `SESSION_NOT_FOUND` for sessions of other users.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionDetailResponse>, AppError> {
    let snapshot = state
        .attendance
        .get_session(auth.user_id, session_id)
        .await?;

    Ok(Json(snapshot.into()))
}

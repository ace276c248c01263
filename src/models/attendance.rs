//! Attendance session data models and API request/response types.
//!
//! This module defines:
//! - `AttendanceSession`: one row per (user, business, work date)
//! - `BreakInterval`: break periods recorded against a session
//! - `Evidence`: the GPS-or-QR proof supplied with check-in/check-out
//! - Request and response bodies for the attendance endpoints

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::Coordinate;

/// Per-day attendance state.
///
/// `NotCheckedIn` is never stored; it is what a missing row means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    NotCheckedIn,
    CheckedIn,
    OnBreak,
    CheckedOut,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::NotCheckedIn => "NOT_CHECKED_IN",
            AttendanceStatus::CheckedIn => "CHECKED_IN",
            AttendanceStatus::OnBreak => "ON_BREAK",
            AttendanceStatus::CheckedOut => "CHECKED_OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_CHECKED_IN" => Some(AttendanceStatus::NotCheckedIn),
            "CHECKED_IN" => Some(AttendanceStatus::CheckedIn),
            "ON_BREAK" => Some(AttendanceStatus::OnBreak),
            "CHECKED_OUT" => Some(AttendanceStatus::CheckedOut),
            _ => None,
        }
    }

    /// Checked in and not yet checked out.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            AttendanceStatus::CheckedIn | AttendanceStatus::OnBreak
        )
    }
}

/// How presence was proven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMethod {
    Gps,
    Qr,
}

impl CheckMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckMethod::Gps => "gps",
            CheckMethod::Qr => "qr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gps" => Some(CheckMethod::Gps),
            "qr" => Some(CheckMethod::Qr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakType {
    #[default]
    Normal,
    Lunch,
}

impl BreakType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakType::Normal => "normal",
            BreakType::Lunch => "lunch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(BreakType::Normal),
            "lunch" => Some(BreakType::Lunch),
            _ => None,
        }
    }
}

/// Proof of presence supplied with a check-in or check-out.
///
/// # JSON Examples
///
/// ```json
/// { "method": "gps", "latitude": 37.5665, "longitude": 126.9780 }
/// { "method": "qr", "token": "eyJraWQiOi..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Evidence {
    Gps(Coordinate),
    Qr { token: String },
}

impl Evidence {
    pub fn method(&self) -> CheckMethod {
        match self {
            Evidence::Gps(_) => CheckMethod::Gps,
            Evidence::Qr { .. } => CheckMethod::Qr,
        }
    }

    /// Location recorded on the session, if the evidence has one.
    pub fn location(&self) -> Option<Coordinate> {
        match self {
            Evidence::Gps(point) => Some(*point),
            Evidence::Qr { .. } => None,
        }
    }
}

/// Identity of the single session a user may hold per business and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub work_date: NaiveDate,
}

/// One attendance session.
///
/// # Database Table
///
/// Maps to `attendance_sessions`, unique on (user_id, business_id, work_date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub business_id: Uuid,
    pub work_date: NaiveDate,
    pub status: AttendanceStatus,
    pub check_in_time: DateTime<Utc>,
    pub check_in_method: CheckMethod,
    pub check_in_location: Option<Coordinate>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub check_out_method: Option<CheckMethod>,
    pub check_out_location: Option<Coordinate>,

    /// Set only once the session reaches `CheckedOut`
    pub work_duration_seconds: Option<i64>,

    /// Sum of closed break intervals; never counts an open break
    pub break_duration_seconds: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttendanceSession {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id,
            business_id: self.business_id,
            work_date: self.work_date,
        }
    }
}

/// A break taken during a session.
///
/// # Database Table
///
/// Maps to `break_intervals`. A partial unique index allows at most one
/// open (`end_time IS NULL`) interval per session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakInterval {
    pub id: Uuid,
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub break_type: BreakType,
}

impl BreakInterval {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A session together with its break intervals, as loaded and written by
/// the ledger in one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: AttendanceSession,
    /// Ordered by start time
    pub breaks: Vec<BreakInterval>,
}

/// Which session a post-check-in operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTarget {
    /// A specific session by id
    Id(Uuid),
    /// The caller's session for this business today
    Today(Uuid),
}

/// Request to check in.
///
/// # JSON Example
///
/// ```json
/// {
///   "business_id": "550e8400-e29b-41d4-a716-446655440000",
///   "evidence": { "method": "gps", "latitude": 37.5665, "longitude": 126.9780 }
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub business_id: Uuid,
    pub evidence: Evidence,
}

/// Addressing fields shared by the post-check-in requests.
///
/// Exactly one of `session_id` and `business_id` must be set.
#[derive(Debug, Default, Deserialize)]
pub struct TargetRequest {
    pub session_id: Option<Uuid>,
    pub business_id: Option<Uuid>,
}

impl TargetRequest {
    pub fn into_target(self) -> Result<SessionTarget, AppError> {
        match (self.session_id, self.business_id) {
            (Some(id), None) => Ok(SessionTarget::Id(id)),
            (None, Some(business_id)) => Ok(SessionTarget::Today(business_id)),
            _ => Err(AppError::Validation(
                "Exactly one of session_id or business_id is required".to_string(),
            )),
        }
    }
}

/// Request to check out. Evidence is optional.
#[derive(Debug, Deserialize)]
pub struct CheckOutRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    pub evidence: Option<Evidence>,
}

/// Request to start a break.
#[derive(Debug, Deserialize)]
pub struct StartBreakRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
    #[serde(default)]
    pub break_type: BreakType,
}

/// Query string for `GET /api/v1/attendance/today`.
#[derive(Debug, Deserialize)]
pub struct TodayQuery {
    pub business_id: Uuid,
}

/// Query string for `GET /api/v1/attendance/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub business_id: Option<Uuid>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Response body for attendance operations.
///
/// # JSON Example
///
/// ```json
/// {
///   "session_id": "770e8400-e29b-41d4-a716-446655440002",
///   "business_id": "550e8400-e29b-41d4-a716-446655440000",
///   "work_date": "2025-03-03",
///   "status": "CHECKED_OUT",
///   "check_in_time": "2025-03-03T09:00:00Z",
///   "check_in_method": "gps",
///   "check_out_time": "2025-03-03T17:00:00Z",
///   "check_out_method": "gps",
///   "break_duration_seconds": 1800,
///   "work_duration_seconds": 27000,
///   "on_break_since": null
/// }
/// ```
///
/// Before the first check-in of the day, `session_id` and the timestamps
/// are null and `status` is `NOT_CHECKED_IN`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceResponse {
    pub session_id: Option<Uuid>,
    pub business_id: Uuid,
    pub work_date: NaiveDate,
    pub status: AttendanceStatus,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_in_method: Option<CheckMethod>,
    pub check_out_time: Option<DateTime<Utc>>,
    pub check_out_method: Option<CheckMethod>,
    pub break_duration_seconds: i64,
    pub work_duration_seconds: Option<i64>,
    pub on_break_since: Option<DateTime<Utc>>,
}

impl AttendanceResponse {
    pub fn not_checked_in(business_id: Uuid, work_date: NaiveDate) -> Self {
        Self {
            session_id: None,
            business_id,
            work_date,
            status: AttendanceStatus::NotCheckedIn,
            check_in_time: None,
            check_in_method: None,
            check_out_time: None,
            check_out_method: None,
            break_duration_seconds: 0,
            work_duration_seconds: None,
            on_break_since: None,
        }
    }
}

impl From<&SessionSnapshot> for AttendanceResponse {
    fn from(snapshot: &SessionSnapshot) -> Self {
        let session = &snapshot.session;
        Self {
            session_id: Some(session.id),
            business_id: session.business_id,
            work_date: session.work_date,
            status: session.status,
            check_in_time: Some(session.check_in_time),
            check_in_method: Some(session.check_in_method),
            check_out_time: session.check_out_time,
            check_out_method: session.check_out_method,
            break_duration_seconds: session.break_duration_seconds,
            work_duration_seconds: session.work_duration_seconds,
            on_break_since: snapshot
                .breaks
                .iter()
                .find(|b| b.is_open())
                .map(|b| b.start_time),
        }
    }
}

/// Response for `GET /api/v1/attendance/{id}`, including break intervals.
#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub attendance: AttendanceResponse,
    pub check_in_location: Option<Coordinate>,
    pub check_out_location: Option<Coordinate>,
    pub breaks: Vec<BreakInterval>,
}

impl From<SessionSnapshot> for SessionDetailResponse {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            attendance: AttendanceResponse::from(&snapshot),
            check_in_location: snapshot.session.check_in_location,
            check_out_location: snapshot.session.check_out_location,
            breaks: snapshot.breaks,
        }
    }
}

//! Error types and HTTP error response handling.
//!
//! Every rejected operation surfaces as an [`AppError`] variant with a stable
//! reason code (see [`AppError::code`]). Callers match on the variant or the
//! code, never on the message text.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// Reasons a QR token can fail verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Bad encoding, missing field or unparseable nonce/signature.
    #[error("QR token is malformed")]
    Malformed,

    #[error("QR token has expired")]
    Expired,

    /// Payload does not match its signature, or the signing key is unknown.
    #[error("QR token signature is invalid")]
    InvalidSignature,

    #[error("QR token has already been used")]
    AlreadyUsed,

    /// Token is genuine but was issued for another worksite.
    #[error("QR token was issued for a different worksite")]
    BusinessMismatch,
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => "TOKEN_MALFORMED",
            TokenError::Expired => "TOKEN_EXPIRED",
            TokenError::InvalidSignature => "TOKEN_INVALID_SIGNATURE",
            TokenError::AlreadyUsed => "TOKEN_ALREADY_USED",
            TokenError::BusinessMismatch => "TOKEN_BUSINESS_MISMATCH",
        }
    }
}

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation**: malformed input, rejected before the ledger is touched
/// - **Geofence**: evidence location outside the allowed radius
/// - **Token**: QR token verification or issuance failures
/// - **State conflicts**: a transition guard failed
/// - **Not found**: referenced session or worksite does not exist
/// - **Persistence**: transient database failure, safe to retry
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Nothing is partially committed when this is returned, so the whole
    /// operation can be retried.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// API key is missing, invalid, or inactive.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Authenticated caller may not perform this operation.
    #[error("{0}")]
    Forbidden(String),

    /// Request body or parameters are invalid.
    #[error("{0}")]
    Validation(String),

    /// Location evidence is farther from the worksite than allowed.
    #[error(
        "Location is {distance_meters:.1} m from the worksite; the allowed radius is {limit_meters:.1} m"
    )]
    GeofenceViolation {
        distance_meters: f64,
        limit_meters: f64,
    },

    #[error(transparent)]
    Token(#[from] TokenError),

    /// The worksite already has the maximum number of unexpired QR tokens.
    #[error("Worksite already has {limit} active QR tokens; wait for one to expire")]
    TokenQuotaExceeded { limit: u32 },

    #[error("Already checked in for today")]
    AlreadyCheckedIn,

    #[error("Already checked out for today")]
    AlreadyCheckedOut,

    #[error("No active check-in for today")]
    NoActiveCheckIn,

    #[error("Not currently on a break")]
    NotOnBreak,

    #[error("Currently on a break; end the break first")]
    AlreadyOnBreak,

    /// The cancellation grace window has passed; a full check-out is required.
    #[error(
        "Check-in can only be cancelled within {grace_secs} s; {elapsed_secs} s have passed"
    )]
    CancellationExpired { elapsed_secs: i64, grace_secs: i64 },

    /// A break was already recorded against the session.
    #[error("Check-in cannot be cancelled after a break has been taken")]
    CancellationNotAllowed,

    #[error("Attendance session not found")]
    SessionNotFound,

    #[error("Worksite not found")]
    WorksiteNotFound,
}

impl AppError {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "PERSISTENCE_ERROR",
            AppError::InvalidApiKey => "INVALID_API_KEY",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::GeofenceViolation { .. } => "GEOFENCE_VIOLATION",
            AppError::Token(e) => e.code(),
            AppError::TokenQuotaExceeded { .. } => "TOKEN_QUOTA_EXCEEDED",
            AppError::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            AppError::AlreadyCheckedOut => "ALREADY_CHECKED_OUT",
            AppError::NoActiveCheckIn => "NO_ACTIVE_CHECK_IN",
            AppError::NotOnBreak => "NOT_ON_BREAK",
            AppError::AlreadyOnBreak => "ALREADY_ON_BREAK",
            AppError::CancellationExpired { .. } => "CANCELLATION_EXPIRED",
            AppError::CancellationNotAllowed => "CANCELLATION_NOT_ALLOWED",
            AppError::SessionNotFound => "SESSION_NOT_FOUND",
            AppError::WorksiteNotFound => "WORKSITE_NOT_FOUND",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidApiKey | AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::GeofenceViolation { .. } => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::TokenQuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AlreadyCheckedIn
            | AppError::AlreadyCheckedOut
            | AppError::NoActiveCheckIn
            | AppError::NotOnBreak
            | AppError::AlreadyOnBreak
            | AppError::CancellationExpired { .. }
            | AppError::CancellationNotAllowed => StatusCode::CONFLICT,
            AppError::SessionNotFound | AppError::WorksiteNotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Concrete numbers for UI feedback, where the variant carries any.
    fn details(&self) -> Option<Value> {
        match self {
            AppError::GeofenceViolation {
                distance_meters,
                limit_meters,
            } => Some(json!({
                "distance_meters": distance_meters,
                "limit_meters": limit_meters,
            })),
            AppError::CancellationExpired {
                elapsed_secs,
                grace_secs,
            } => Some(json!({
                "elapsed_seconds": elapsed_secs,
                "grace_seconds": grace_secs,
                "remaining_grace_seconds": (grace_secs - elapsed_secs).max(0),
            })),
            AppError::TokenQuotaExceeded { limit } => Some(json!({ "limit": limit })),
            _ => None,
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "GEOFENCE_VIOLATION",
///     "message": "Location is 120.4 m from the worksite; the allowed radius is 50.0 m",
///     "details": { "distance_meters": 120.4, "limit_meters": 50.0 }
///   }
/// }
/// ```
///
/// `details` is omitted when the error carries no numbers. Database errors
/// are logged and hidden from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match self {
            AppError::Database(ref e) => {
                tracing::error!("Persistence failure: {:?}", e);
                "A temporary storage error occurred; retry the request".to_string()
            }
            _ => self.to_string(),
        };

        let mut error = json!({
            "code": self.code(),
            "message": message,
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}

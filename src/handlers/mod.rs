//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service with the authenticated caller's id
//! 3. Returns HTTP response (JSON, status code)

/// Attendance state machine endpoints
pub mod attendance;
/// Liveness and database connectivity
pub mod health;
/// QR token issuance and verification
pub mod qr_tokens;

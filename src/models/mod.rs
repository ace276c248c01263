//! Data models representing database entities and API payloads.

/// API key authentication model
pub mod api_key;
/// Attendance sessions and break intervals
pub mod attendance;
/// Coordinates
pub mod location;
/// Signed QR tokens
pub mod qr_token;
/// Registered worksites
pub mod worksite;

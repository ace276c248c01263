//! Business logic services.
//!
//! Services hold the attendance rules and the QR token protocol, separated
//! from HTTP handlers. Storage is reached only through the traits in
//! [`crate::store`].

pub mod attendance_service;
pub mod break_tracker;
pub mod geo;
pub mod qr_token;

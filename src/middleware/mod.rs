//! HTTP middleware.
//!
//! Runs ahead of the `/api/v1` handlers and rejects requests without a valid
//! API key before any attendance logic executes.

/// Bearer API key authentication
pub mod auth;

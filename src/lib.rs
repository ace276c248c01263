//! Attendance Service
//!
//! A REST API for recording worker attendance at registered worksites.
//! Workers check in and out with proof of presence: either a GPS fix inside
//! the worksite geofence or a short-lived signed QR token shown at the site.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries, transactional locks)
//! - **Authentication**: API key with SHA-256 hashing
//! - **Format**: JSON requests/responses

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The `/api/v1` routes, without authentication.
///
/// Every handler extracts `Extension<AuthContext>`, so a layer that inserts
/// it must wrap these routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Attendance routes
        .route(
            "/api/v1/attendance/check-in",
            post(handlers::attendance::check_in),
        )
        .route(
            "/api/v1/attendance/check-out",
            post(handlers::attendance::check_out),
        )
        .route(
            "/api/v1/attendance/breaks/start",
            post(handlers::attendance::start_break),
        )
        .route(
            "/api/v1/attendance/breaks/end",
            post(handlers::attendance::end_break),
        )
        .route(
            "/api/v1/attendance/cancel",
            post(handlers::attendance::cancel_check_in),
        )
        .route("/api/v1/attendance/today", get(handlers::attendance::today))
        .route(
            "/api/v1/attendance/history",
            get(handlers::attendance::history),
        )
        .route(
            "/api/v1/attendance/{id}",
            get(handlers::attendance::get_session),
        )
        // QR token routes
        .route(
            "/api/v1/worksites/{business_id}/qr-tokens",
            post(handlers::qr_tokens::issue_token),
        )
        .route(
            "/api/v1/qr-tokens/verify",
            post(handlers::qr_tokens::verify_token),
        )
}

/// Build the HTTP router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = api_routes().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::auth_middleware,
    ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

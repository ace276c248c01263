//! Health check endpoint for load balancers and deploy probes.

use crate::{db::DbPool, error::AppError};
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,

    pub version: &'static str,

    /// Open connections in the pool, busy or idle
    pub pool_size: u32,

    pub idle_connections: usize,

    pub timestamp: DateTime<Utc>,
}

/// `GET /health`, public.
///
/// Runs `SELECT 1` on the pool. When the database is unreachable the
/// standard error body is returned with 503 and `PERSISTENCE_ERROR`.
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "pool_size": 3,
///   "idle_connections": 2,
///   "timestamp": "2025-03-03T09:00:00Z"
/// }
/// ```
pub async fn health_check(State(pool): State<DbPool>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        pool_size: pool.size(),
        idle_connections: pool.num_idle(),
        timestamp: Utc::now(),
    }))
}

//! Attendance Service - Main Application Entry Point
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Start the expired-token purge loop
//! 5. Build HTTP router and start server on configured port

use std::sync::Arc;
use std::time::Duration;

use attendance_web_server::clock::{Clock, SystemClock};
use attendance_web_server::state::AppState;
use attendance_web_server::{build_router, config, db};
use tracing_subscriber::EnvFilter;

/// How often expired replay marks and quota entries are deleted.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (state, tokens) = AppState::from_config(pool, &config, clock.clone());

    // Expired rows are already ignored by every query; purging only bounds
    // table growth.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match tokens.purge_expired(clock.now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired QR token records"),
                Err(e) => tracing::warn!("Failed to purge expired QR token records: {}", e),
            }
        }
    });

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

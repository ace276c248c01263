//! Shared application state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::DbPool;
use crate::services::attendance_service::{AttendancePolicy, AttendanceService};
use crate::services::qr_token::{TokenIssuer, TokenVerifier};
use crate::store::postgres::{PgLedger, PgTokenStore, PgWorksiteRegistry};
use crate::store::WorksiteRegistry;

#[derive(Clone)]
pub struct AppState {
    /// Used directly by authentication and the health check
    pub pool: DbPool,
    pub attendance: Arc<AttendanceService>,
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub worksites: Arc<dyn WorksiteRegistry>,
}

impl AppState {
    /// Wire the PostgreSQL-backed stores into the services.
    ///
    /// Returns the token store as well so the caller can run its purge loop.
    pub fn from_config(
        pool: DbPool,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> (Self, Arc<PgTokenStore>) {
        let ledger = Arc::new(PgLedger::new(pool.clone()));
        let tokens = Arc::new(PgTokenStore::new(pool.clone()));
        let worksites: Arc<dyn WorksiteRegistry> = Arc::new(PgWorksiteRegistry::new(pool.clone()));

        let keys = config.signing_keys();
        let issuer = Arc::new(TokenIssuer::new(
            keys.clone(),
            tokens.clone(),
            clock.clone(),
            config.qr_token_ttl_secs,
            config.qr_max_active_tokens,
        ));
        let verifier = Arc::new(TokenVerifier::new(keys, tokens.clone(), clock.clone()));

        let policy = AttendancePolicy {
            cancel_grace: Duration::seconds(config.check_in_cancel_grace_secs),
            checkout_radius_multiplier: config.checkout_radius_multiplier,
        };
        let attendance = Arc::new(AttendanceService::new(
            ledger,
            worksites.clone(),
            verifier.clone(),
            clock,
            policy,
        ));

        let state = Self {
            pool,
            attendance,
            issuer,
            verifier,
            worksites,
        };
        (state, tokens)
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

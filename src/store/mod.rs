//! Storage collaborators of the attendance engine.
//!
//! Each seam is a trait with a PostgreSQL implementation ([`postgres`]) used
//! by the server and an in-memory implementation ([`memory`]) used by tests
//! and local runs. Both honour the same atomicity contracts:
//!
//! - [`Ledger::apply`] evaluates a transition against a locked snapshot and
//!   writes its result in the same unit of work.
//! - [`ReplayStore::check_and_mark`] is a single atomic check-and-insert.
//! - [`TokenQuota::try_reserve`] counts and reserves in one critical section.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::attendance::{SessionKey, SessionSnapshot};
use crate::models::worksite::Worksite;

pub mod memory;
pub mod postgres;

/// How [`Ledger::apply`] locates the session it locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLookup {
    ById(Uuid),
    ByKey(SessionKey),
}

/// What a transition wants written.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerWrite {
    /// Create a new session (check-in)
    Insert(SessionSnapshot),
    /// Replace the session row and upsert its break intervals
    Update(SessionSnapshot),
    /// Remove the session and its breaks (cancelled check-in)
    Delete(Uuid),
}

/// Guard-and-compute step run inside the ledger's critical section.
///
/// Receives the locked snapshot (`None` when no row matches) and returns the
/// write to perform, or the reason the transition is rejected.
pub type Transition<'a> =
    Box<dyn FnOnce(Option<&SessionSnapshot>) -> Result<LedgerWrite, AppError> + Send + 'a>;

/// Durable, transactional store of attendance sessions.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Load a session and its breaks without locking.
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>, AppError>;

    /// Load the session for a (user, business, date) key without locking.
    async fn find(&self, key: &SessionKey) -> Result<Option<SessionSnapshot>, AppError>;

    /// Sessions of a user within an inclusive date range, newest first.
    async fn list(
        &self,
        user_id: Uuid,
        business_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SessionSnapshot>, AppError>;

    /// Run `transition` against the locked session and commit its write.
    ///
    /// Returns the snapshot as written, or `None` after a delete. Nothing is
    /// written when the transition returns an error.
    async fn apply(
        &self,
        lookup: SessionLookup,
        transition: Transition<'_>,
    ) -> Result<Option<SessionSnapshot>, AppError>;
}

/// Consumed-token registry used for replay protection.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    /// Mark `token_id` as used for `ttl` from `now`.
    ///
    /// Returns `true` if this call marked it, `false` if it was already
    /// marked and the mark has not expired.
    ///
    /// Stores that also implement [`TokenQuota`] release the token's quota
    /// slot in the same step when the mark succeeds.
    async fn check_and_mark(
        &self,
        token_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

/// Index of issued tokens per worksite that are neither expired nor used.
#[async_trait]
pub trait TokenQuota: Send + Sync {
    /// Reserve a slot for a newly issued token unless the worksite already
    /// has `limit` outstanding ones. Returns `false` when the cap is reached.
    async fn try_reserve(
        &self,
        business_id: Uuid,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool, AppError>;

    /// Number of outstanding tokens issued for the worksite.
    async fn active_count(&self, business_id: Uuid, now: DateTime<Utc>) -> Result<u32, AppError>;
}

/// Read-only lookup of registered worksites.
#[async_trait]
pub trait WorksiteRegistry: Send + Sync {
    async fn get(&self, business_id: Uuid) -> Result<Option<Worksite>, AppError>;
}

//! Attendance service - the per-day session state machine.
//!
//! ```text
//! NOT_CHECKED_IN --check_in--> CHECKED_IN --check_out--> CHECKED_OUT
//!        ^                      |      ^
//!        +--cancel_check_in-----+      |
//!                          start_break end_break
//!                               |      |
//!                               v      |
//!                               ON_BREAK
//! ```
//!
//! # Atomicity Guarantees
//!
//! Every transition re-evaluates its guard inside [`Ledger::apply`], against
//! the locked snapshot, and writes in the same unit of work. The unlocked
//! reads done beforehand only fail fast (so a QR token is not burned for a
//! request that is bound to be rejected); they never decide an outcome.
//!
//! # Open Breaks at Check-out
//!
//! Check-out is rejected with `AlreadyOnBreak` while a break is open. The
//! caller ends the break first.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::models::attendance::{
    AttendanceResponse, AttendanceSession, AttendanceStatus, BreakType, Evidence, SessionKey,
    SessionSnapshot, SessionTarget,
};
use crate::models::worksite::Worksite;
use crate::services::qr_token::TokenVerifier;
use crate::services::{break_tracker, geo};
use crate::store::{Ledger, LedgerWrite, SessionLookup, WorksiteRegistry};

/// Longest date range a history query may span.
pub const MAX_HISTORY_DAYS: i64 = 31;

/// Tunable rules of the state machine.
#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    /// How long after check-in the check-in may be cancelled outright
    pub cancel_grace: Duration,
    /// Factor applied to the worksite radius for check-out evidence
    pub checkout_radius_multiplier: f64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::minutes(5),
            checkout_radius_multiplier: 2.0,
        }
    }
}

pub struct AttendanceService {
    ledger: Arc<dyn Ledger>,
    worksites: Arc<dyn WorksiteRegistry>,
    verifier: Arc<TokenVerifier>,
    clock: Arc<dyn Clock>,
    policy: AttendancePolicy,
}

/// Any existing session for the day blocks a new check-in.
fn check_in_guard(existing: &SessionSnapshot) -> Result<(), AppError> {
    if existing.session.status.is_open() {
        Err(AppError::AlreadyCheckedIn)
    } else {
        Err(AppError::AlreadyCheckedOut)
    }
}

fn check_out_guard(snapshot: &SessionSnapshot) -> Result<(), AppError> {
    match snapshot.session.status {
        AttendanceStatus::CheckedIn => Ok(()),
        AttendanceStatus::OnBreak => Err(AppError::AlreadyOnBreak),
        AttendanceStatus::CheckedOut => Err(AppError::AlreadyCheckedOut),
        AttendanceStatus::NotCheckedIn => Err(AppError::NoActiveCheckIn),
    }
}

fn missing(target: SessionTarget) -> AppError {
    match target {
        SessionTarget::Id(_) => AppError::SessionNotFound,
        SessionTarget::Today(_) => AppError::NoActiveCheckIn,
    }
}

/// Reject malformed evidence before any storage is touched.
fn validate_evidence(evidence: &Evidence) -> Result<(), AppError> {
    match evidence {
        Evidence::Gps(point) => {
            geo::validate_coordinate(point.latitude, point.longitude)?;
        }
        Evidence::Qr { token } => {
            if token.trim().is_empty() {
                return Err(AppError::Validation("QR token must not be empty".to_string()));
            }
        }
    }
    Ok(())
}

/// `(check_out - check_in) - breaks`, floored at zero.
pub fn work_duration_seconds(
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    break_seconds: i64,
) -> i64 {
    ((check_out - check_in).num_seconds() - break_seconds).max(0)
}

impl AttendanceService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        worksites: Arc<dyn WorksiteRegistry>,
        verifier: Arc<TokenVerifier>,
        clock: Arc<dyn Clock>,
        policy: AttendancePolicy,
    ) -> Self {
        Self {
            ledger,
            worksites,
            verifier,
            clock,
            policy,
        }
    }

    async fn worksite(&self, business_id: Uuid) -> Result<Worksite, AppError> {
        self.worksites
            .get(business_id)
            .await?
            .ok_or(AppError::WorksiteNotFound)
    }

    /// Check evidence against the worksite, consuming QR tokens.
    async fn verify_evidence(
        &self,
        worksite: &Worksite,
        evidence: &Evidence,
        radius_meters: f64,
    ) -> Result<(), AppError> {
        match evidence {
            Evidence::Gps(point) => {
                let measured = geo::ensure_within(worksite.center(), *point, radius_meters)
                    .inspect_err(|e| {
                        tracing::warn!(business_id = %worksite.business_id, "Geofence check failed: {}", e);
                    })?;
                tracing::debug!(
                    business_id = %worksite.business_id,
                    distance_meters = measured,
                    radius_meters,
                    "Geofence check passed"
                );
            }
            Evidence::Qr { token } => {
                self.verifier
                    .verify_for_business(token, worksite.business_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Work out how to lock the target session and read it once, unlocked.
    ///
    /// The returned snapshot is `None` when the target does not exist or
    /// belongs to another user.
    async fn resolve(
        &self,
        user_id: Uuid,
        target: SessionTarget,
    ) -> Result<(SessionLookup, Option<SessionSnapshot>), AppError> {
        let (lookup, current) = match target {
            SessionTarget::Id(id) => (SessionLookup::ById(id), self.ledger.get(id).await?),
            SessionTarget::Today(business_id) => {
                let worksite = self.worksite(business_id).await?;
                let key = SessionKey {
                    user_id,
                    business_id,
                    work_date: worksite.work_date(self.clock.now()),
                };
                (SessionLookup::ByKey(key), self.ledger.find(&key).await?)
            }
        };
        Ok((lookup, current.filter(|s| s.session.user_id == user_id)))
    }

    /// Apply `step` to the caller's locked session.
    async fn transition<F>(
        &self,
        user_id: Uuid,
        target: SessionTarget,
        lookup: SessionLookup,
        step: F,
    ) -> Result<Option<SessionSnapshot>, AppError>
    where
        F: FnOnce(SessionSnapshot) -> Result<LedgerWrite, AppError> + Send + 'static,
    {
        self.ledger
            .apply(
                lookup,
                Box::new(move |current: Option<&SessionSnapshot>| {
                    let snapshot = current
                        .filter(|s| s.session.user_id == user_id)
                        .cloned()
                        .ok_or_else(|| missing(target))?;
                    step(snapshot)
                }),
            )
            .await
    }

    /// Check in to a worksite for today.
    ///
    /// # Process
    ///
    /// 1. Validate evidence shape
    /// 2. Look up the worksite and today's key
    /// 3. Fail fast if today's session already exists
    /// 4. Verify GPS distance or consume the QR token
    /// 5. Insert the session under the key lock, re-checking step 3
    ///
    /// # Errors
    ///
    /// - `Validation`: bad coordinate or empty token
    /// - `WorksiteNotFound`: business has no registered worksite
    /// - `AlreadyCheckedIn` / `AlreadyCheckedOut`: today's session exists
    /// - `GeofenceViolation`: outside the worksite radius
    /// - `Token(_)`: QR token rejected
    pub async fn check_in(
        &self,
        user_id: Uuid,
        business_id: Uuid,
        evidence: Evidence,
    ) -> Result<SessionSnapshot, AppError> {
        validate_evidence(&evidence)?;

        let worksite = self.worksite(business_id).await?;
        let now = self.clock.now();
        let key = SessionKey {
            user_id,
            business_id,
            work_date: worksite.work_date(now),
        };

        if let Some(existing) = self.ledger.find(&key).await? {
            check_in_guard(&existing)?;
        }

        self.verify_evidence(&worksite, &evidence, worksite.radius_meters)
            .await?;

        let session = AttendanceSession {
            id: Uuid::new_v4(),
            user_id,
            business_id,
            work_date: key.work_date,
            status: AttendanceStatus::CheckedIn,
            check_in_time: now,
            check_in_method: evidence.method(),
            check_in_location: evidence.location(),
            check_out_time: None,
            check_out_method: None,
            check_out_location: None,
            work_duration_seconds: None,
            break_duration_seconds: 0,
            created_at: now,
            updated_at: now,
        };

        let written = self
            .ledger
            .apply(
                SessionLookup::ByKey(key),
                Box::new(move |current: Option<&SessionSnapshot>| {
                    if let Some(existing) = current {
                        check_in_guard(existing)?;
                    }
                    Ok(LedgerWrite::Insert(SessionSnapshot {
                        session,
                        breaks: Vec::new(),
                    }))
                }),
            )
            .await?
            .ok_or(AppError::SessionNotFound)?;

        tracing::info!(
            %user_id,
            %business_id,
            session_id = %written.session.id,
            method = written.session.check_in_method.as_str(),
            "Checked in"
        );
        Ok(written)
    }

    /// Start a break on a checked-in session.
    ///
    /// # Errors
    ///
    /// - `AlreadyOnBreak`: a break is already open
    /// - `AlreadyCheckedOut`: the session is finished
    /// - `NoActiveCheckIn` / `SessionNotFound`: no such session
    pub async fn start_break(
        &self,
        user_id: Uuid,
        target: SessionTarget,
        break_type: BreakType,
    ) -> Result<SessionSnapshot, AppError> {
        let (lookup, _) = self.resolve(user_id, target).await?;
        let now = self.clock.now();

        let written = self
            .transition(user_id, target, lookup, move |mut snapshot| {
                match snapshot.session.status {
                    AttendanceStatus::CheckedIn => {}
                    AttendanceStatus::OnBreak => return Err(AppError::AlreadyOnBreak),
                    AttendanceStatus::CheckedOut => return Err(AppError::AlreadyCheckedOut),
                    AttendanceStatus::NotCheckedIn => return Err(AppError::NoActiveCheckIn),
                }
                break_tracker::start(&mut snapshot, break_type, now)?;
                snapshot.session.status = AttendanceStatus::OnBreak;
                snapshot.session.updated_at = now;
                Ok(LedgerWrite::Update(snapshot))
            })
            .await?
            .ok_or_else(|| missing(target))?;

        tracing::info!(%user_id, session_id = %written.session.id, break_type = break_type.as_str(), "Break started");
        Ok(written)
    }

    /// End the open break and add its length to the session's break total.
    ///
    /// # Errors
    ///
    /// - `NotOnBreak`: no break is open
    /// - `AlreadyCheckedOut`: the session is finished
    /// - `NoActiveCheckIn` / `SessionNotFound`: no such session
    pub async fn end_break(
        &self,
        user_id: Uuid,
        target: SessionTarget,
    ) -> Result<SessionSnapshot, AppError> {
        let (lookup, _) = self.resolve(user_id, target).await?;
        let now = self.clock.now();

        let written = self
            .transition(user_id, target, lookup, move |mut snapshot| {
                match snapshot.session.status {
                    AttendanceStatus::OnBreak => {}
                    AttendanceStatus::CheckedIn => return Err(AppError::NotOnBreak),
                    AttendanceStatus::CheckedOut => return Err(AppError::AlreadyCheckedOut),
                    AttendanceStatus::NotCheckedIn => return Err(AppError::NoActiveCheckIn),
                }
                break_tracker::end(&mut snapshot, now)?;
                snapshot.session.status = AttendanceStatus::CheckedIn;
                snapshot.session.updated_at = now;
                Ok(LedgerWrite::Update(snapshot))
            })
            .await?
            .ok_or_else(|| missing(target))?;

        tracing::info!(
            %user_id,
            session_id = %written.session.id,
            break_duration_seconds = written.session.break_duration_seconds,
            "Break ended"
        );
        Ok(written)
    }

    /// Check out and compute the day's work duration.
    ///
    /// Evidence is optional. When supplied, GPS is checked against the
    /// worksite radius times `checkout_radius_multiplier`, and a QR token must
    /// belong to the session's worksite.
    ///
    /// # Errors
    ///
    /// - `AlreadyOnBreak`: a break is still open
    /// - `AlreadyCheckedOut`: already checked out
    /// - `NoActiveCheckIn` / `SessionNotFound`: no such session
    /// - `GeofenceViolation` / `Token(_)`: evidence rejected
    pub async fn check_out(
        &self,
        user_id: Uuid,
        target: SessionTarget,
        evidence: Option<Evidence>,
    ) -> Result<SessionSnapshot, AppError> {
        if let Some(ref evidence) = evidence {
            validate_evidence(evidence)?;
        }

        let (lookup, current) = self.resolve(user_id, target).await?;
        let current = current.ok_or_else(|| missing(target))?;
        check_out_guard(&current)?;

        if let Some(ref evidence) = evidence {
            let worksite = self.worksite(current.session.business_id).await?;
            let radius = worksite.radius_meters * self.policy.checkout_radius_multiplier;
            self.verify_evidence(&worksite, evidence, radius).await?;
        }

        let now = self.clock.now();
        let method = evidence.as_ref().map(Evidence::method);
        let location = evidence.as_ref().and_then(Evidence::location);

        let written = self
            .transition(user_id, target, lookup, move |mut snapshot| {
                check_out_guard(&snapshot)?;

                let session = &mut snapshot.session;
                let check_out_time = now.max(session.check_in_time);
                session.status = AttendanceStatus::CheckedOut;
                session.check_out_time = Some(check_out_time);
                session.check_out_method = method;
                session.check_out_location = location;
                session.work_duration_seconds = Some(work_duration_seconds(
                    session.check_in_time,
                    check_out_time,
                    session.break_duration_seconds,
                ));
                session.updated_at = now;
                Ok(LedgerWrite::Update(snapshot))
            })
            .await?
            .ok_or_else(|| missing(target))?;

        tracing::info!(
            %user_id,
            session_id = %written.session.id,
            work_duration_seconds = written.session.work_duration_seconds,
            break_duration_seconds = written.session.break_duration_seconds,
            "Checked out"
        );
        Ok(written)
    }

    /// Undo a check-in made moments ago, deleting the session.
    ///
    /// Returns the key of the removed session.
    ///
    /// # Errors
    ///
    /// - `CancellationExpired`: the grace window has passed
    /// - `CancellationNotAllowed`: a break has been recorded
    /// - `AlreadyOnBreak` / `AlreadyCheckedOut`: not in `CheckedIn`
    /// - `NoActiveCheckIn` / `SessionNotFound`: no such session
    pub async fn cancel_check_in(
        &self,
        user_id: Uuid,
        target: SessionTarget,
    ) -> Result<SessionKey, AppError> {
        let (lookup, current) = self.resolve(user_id, target).await?;
        let key = current.ok_or_else(|| missing(target))?.session.key();

        let now = self.clock.now();
        let grace_secs = self.policy.cancel_grace.num_seconds();

        self.transition(user_id, target, lookup, move |snapshot| {
            let session = &snapshot.session;
            match session.status {
                AttendanceStatus::CheckedIn => {}
                AttendanceStatus::OnBreak => return Err(AppError::AlreadyOnBreak),
                AttendanceStatus::CheckedOut => return Err(AppError::AlreadyCheckedOut),
                AttendanceStatus::NotCheckedIn => return Err(AppError::NoActiveCheckIn),
            }

            let elapsed_secs = (now - session.check_in_time).num_seconds();
            if elapsed_secs > grace_secs {
                return Err(AppError::CancellationExpired {
                    elapsed_secs,
                    grace_secs,
                });
            }
            if !snapshot.breaks.is_empty() {
                return Err(AppError::CancellationNotAllowed);
            }
            Ok(LedgerWrite::Delete(session.id))
        })
        .await?;

        tracing::info!(%user_id, business_id = %key.business_id, work_date = %key.work_date, "Check-in cancelled");
        Ok(key)
    }

    /// A session owned by the caller.
    pub async fn get_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<SessionSnapshot, AppError> {
        let (_, current) = self.resolve(user_id, SessionTarget::Id(session_id)).await?;
        current.ok_or(AppError::SessionNotFound)
    }

    /// Today's state at a worksite; `NotCheckedIn` when there is no session.
    pub async fn today(
        &self,
        user_id: Uuid,
        business_id: Uuid,
    ) -> Result<AttendanceResponse, AppError> {
        let worksite = self.worksite(business_id).await?;
        let work_date = worksite.work_date(self.clock.now());
        let key = SessionKey {
            user_id,
            business_id,
            work_date,
        };

        Ok(match self.ledger.find(&key).await? {
            Some(snapshot) => AttendanceResponse::from(&snapshot),
            None => AttendanceResponse::not_checked_in(business_id, work_date),
        })
    }

    /// The caller's sessions between `from` and `to` inclusive, newest first.
    ///
    /// # Errors
    ///
    /// - `Validation`: `from` after `to`, or a range longer than 31 days
    pub async fn history(
        &self,
        user_id: Uuid,
        business_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SessionSnapshot>, AppError> {
        if from > to {
            return Err(AppError::Validation(
                "`from` must not be after `to`".to_string(),
            ));
        }
        if (to - from).num_days() >= MAX_HISTORY_DAYS {
            return Err(AppError::Validation(format!(
                "History queries may span at most {} days",
                MAX_HISTORY_DAYS
            )));
        }
        self.ledger.list(user_id, business_id, from, to).await
    }
}

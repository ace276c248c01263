//! Break interval bookkeeping for a session.
//!
//! `break_duration_seconds` only advances when an interval closes, by that
//! interval's whole seconds. It therefore never decreases and never counts
//! an open break, no matter how often it is read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::attendance::{BreakInterval, BreakType, SessionSnapshot};
use crate::store::Ledger;

pub fn open_break(breaks: &[BreakInterval]) -> Option<&BreakInterval> {
    breaks.iter().find(|b| b.is_open())
}

pub fn has_open_break(breaks: &[BreakInterval]) -> bool {
    open_break(breaks).is_some()
}

/// Whole seconds of one closed interval; 0 while open.
pub fn interval_seconds(interval: &BreakInterval) -> i64 {
    interval
        .end_time
        .map(|end| (end - interval.start_time).num_seconds().max(0))
        .unwrap_or(0)
}

/// Open a break on the snapshot at `now`.
///
/// The start is clamped to the check-in time so a slightly skewed clock
/// cannot place a break before the session began.
///
/// # Errors
///
/// - `AlreadyOnBreak`: an interval is already open
pub fn start(
    snapshot: &mut SessionSnapshot,
    break_type: BreakType,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if has_open_break(&snapshot.breaks) {
        return Err(AppError::AlreadyOnBreak);
    }

    snapshot.breaks.push(BreakInterval {
        id: Uuid::new_v4(),
        session_id: snapshot.session.id,
        start_time: now.max(snapshot.session.check_in_time),
        end_time: None,
        break_type,
    });
    Ok(())
}

/// Close the open break at `now` and add it to the running total.
///
/// Returns the closed interval's length in seconds.
///
/// # Errors
///
/// - `NotOnBreak`: no interval is open
pub fn end(snapshot: &mut SessionSnapshot, now: DateTime<Utc>) -> Result<i64, AppError> {
    let interval = snapshot
        .breaks
        .iter_mut()
        .find(|b| b.is_open())
        .ok_or(AppError::NotOnBreak)?;

    interval.end_time = Some(now.max(interval.start_time));
    let seconds = interval_seconds(interval);

    snapshot.session.break_duration_seconds += seconds;
    Ok(seconds)
}

/// Read-side view of a session's breaks backed by the ledger.
///
/// Library API for embedders; the HTTP layer reports the same figures
/// through the session responses.
pub struct BreakTracker {
    ledger: Arc<dyn Ledger>,
}

impl BreakTracker {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    async fn load(&self, session_id: Uuid) -> Result<SessionSnapshot, AppError> {
        self.ledger
            .get(session_id)
            .await?
            .ok_or(AppError::SessionNotFound)
    }

    /// Recorded break total, excluding any break still open.
    pub async fn total_break_seconds(&self, session_id: Uuid) -> Result<i64, AppError> {
        Ok(self.load(session_id).await?.session.break_duration_seconds)
    }

    pub async fn has_open_break(&self, session_id: Uuid) -> Result<bool, AppError> {
        Ok(has_open_break(&self.load(session_id).await?.breaks))
    }
}

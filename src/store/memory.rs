//! In-memory store implementations.
//!
//! Each store guards its state with a single `tokio::sync::Mutex`, which
//! gives the same serialization the PostgreSQL implementations get from row
//! and advisory locks. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{Ledger, LedgerWrite, ReplayStore, SessionLookup, TokenQuota, Transition, WorksiteRegistry};
use crate::error::AppError;
use crate::models::attendance::{SessionKey, SessionSnapshot};
use crate::models::worksite::Worksite;

#[derive(Debug, Default)]
pub struct MemoryLedger {
    sessions: Mutex<HashMap<Uuid, SessionSnapshot>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions for a key. Always 0 or 1.
    pub async fn count_for_key(&self, key: &SessionKey) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.session.key() == *key)
            .count()
    }
}

fn find_by_key<'a>(
    sessions: &'a HashMap<Uuid, SessionSnapshot>,
    key: &SessionKey,
) -> Option<&'a SessionSnapshot> {
    sessions.values().find(|s| s.session.key() == *key)
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>, AppError> {
        Ok(self.sessions.lock().await.get(&session_id).cloned())
    }

    async fn find(&self, key: &SessionKey) -> Result<Option<SessionSnapshot>, AppError> {
        Ok(find_by_key(&*self.sessions.lock().await, key).cloned())
    }

    async fn list(
        &self,
        user_id: Uuid,
        business_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SessionSnapshot>, AppError> {
        let sessions = self.sessions.lock().await;
        let mut matching: Vec<SessionSnapshot> = sessions
            .values()
            .filter(|s| {
                s.session.user_id == user_id
                    && business_id.is_none_or(|b| s.session.business_id == b)
                    && s.session.work_date >= from
                    && s.session.work_date <= to
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.session
                .work_date
                .cmp(&a.session.work_date)
                .then(b.session.check_in_time.cmp(&a.session.check_in_time))
        });
        Ok(matching)
    }

    async fn apply(
        &self,
        lookup: SessionLookup,
        transition: Transition<'_>,
    ) -> Result<Option<SessionSnapshot>, AppError> {
        // Held across guard evaluation and write.
        let mut sessions = self.sessions.lock().await;

        let current = match lookup {
            SessionLookup::ById(id) => sessions.get(&id),
            SessionLookup::ByKey(ref key) => find_by_key(&sessions, key),
        };

        match transition(current)? {
            LedgerWrite::Insert(snapshot) => {
                if find_by_key(&sessions, &snapshot.session.key()).is_some() {
                    return Err(AppError::AlreadyCheckedIn);
                }
                sessions.insert(snapshot.session.id, snapshot.clone());
                Ok(Some(snapshot))
            }
            LedgerWrite::Update(snapshot) => {
                let slot = sessions
                    .get_mut(&snapshot.session.id)
                    .ok_or(AppError::SessionNotFound)?;
                *slot = snapshot.clone();
                Ok(Some(snapshot))
            }
            LedgerWrite::Delete(id) => {
                sessions.remove(&id).ok_or(AppError::SessionNotFound)?;
                Ok(None)
            }
        }
    }
}

/// Replay marks and issued-token index in one store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    used: Mutex<HashMap<String, DateTime<Utc>>>,
    issued: Mutex<HashMap<Uuid, HashMap<String, DateTime<Utc>>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayStore for MemoryTokenStore {
    async fn check_and_mark(
        &self,
        token_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut used = self.used.lock().await;
        used.retain(|_, expires_at| *expires_at >= now);

        if used.contains_key(token_id) {
            return Ok(false);
        }
        used.insert(token_id.to_string(), now + ttl);

        // A consumed token no longer counts against its worksite's quota.
        for outstanding in self.issued.lock().await.values_mut() {
            outstanding.remove(token_id);
        }
        Ok(true)
    }
}

#[async_trait]
impl TokenQuota for MemoryTokenStore {
    async fn try_reserve(
        &self,
        business_id: Uuid,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool, AppError> {
        let mut issued = self.issued.lock().await;
        let outstanding = issued.entry(business_id).or_default();
        outstanding.retain(|_, expires| *expires > now);

        if outstanding.len() >= limit as usize {
            return Ok(false);
        }
        outstanding.insert(nonce.to_string(), expires_at);
        Ok(true)
    }

    async fn active_count(&self, business_id: Uuid, now: DateTime<Utc>) -> Result<u32, AppError> {
        let issued = self.issued.lock().await;
        let count = issued
            .get(&business_id)
            .map(|tokens| tokens.values().filter(|expires| **expires > now).count())
            .unwrap_or(0);
        Ok(count as u32)
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorksiteRegistry {
    sites: RwLock<HashMap<Uuid, Worksite>>,
}

impl MemoryWorksiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, worksite: Worksite) {
        self.sites
            .write()
            .await
            .insert(worksite.business_id, worksite);
    }
}

#[async_trait]
impl WorksiteRegistry for MemoryWorksiteRegistry {
    async fn get(&self, business_id: Uuid) -> Result<Option<Worksite>, AppError> {
        Ok(self.sites.read().await.get(&business_id).cloned())
    }
}

//! PostgreSQL store implementations.
//!
//! # Locking
//!
//! - Key lookups take `pg_advisory_xact_lock` on the (user, business, date)
//!   key before reading, so two first check-ins of the day cannot both see
//!   "no row". The UNIQUE constraint on the key is the backstop.
//! - Id lookups lock the session row with `SELECT ... FOR UPDATE`.
//! - Quota reservations take an advisory lock on the worksite.
//!
//! All locks are released when the transaction commits or rolls back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{Ledger, LedgerWrite, ReplayStore, SessionLookup, TokenQuota, Transition, WorksiteRegistry};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::attendance::{
    AttendanceSession, AttendanceStatus, BreakInterval, BreakType, CheckMethod, SessionKey,
    SessionSnapshot,
};
use crate::models::location::Coordinate;
use crate::models::worksite::Worksite;

const SESSION_COLUMNS: &str = r#"
    id, user_id, business_id, work_date, status,
    check_in_time, check_in_method, check_in_latitude, check_in_longitude,
    check_out_time, check_out_method, check_out_latitude, check_out_longitude,
    work_duration_seconds, break_duration_seconds, created_at, updated_at
"#;

/// Raw `attendance_sessions` row; enums are stored as text.
#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    business_id: Uuid,
    work_date: NaiveDate,
    status: String,
    check_in_time: DateTime<Utc>,
    check_in_method: String,
    check_in_latitude: Option<f64>,
    check_in_longitude: Option<f64>,
    check_out_time: Option<DateTime<Utc>>,
    check_out_method: Option<String>,
    check_out_latitude: Option<f64>,
    check_out_longitude: Option<f64>,
    work_duration_seconds: Option<i64>,
    break_duration_seconds: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct BreakRow {
    id: Uuid,
    session_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    break_type: String,
}

fn point(latitude: Option<f64>, longitude: Option<f64>) -> Option<Coordinate> {
    match (latitude, longitude) {
        (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
        _ => None,
    }
}

fn corrupt(column: &str, value: &str) -> AppError {
    AppError::Database(sqlx::Error::Decode(
        format!("unexpected {} value {:?}", column, value).into(),
    ))
}

impl TryFrom<SessionRow> for AttendanceSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status =
            AttendanceStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let check_in_method = CheckMethod::parse(&row.check_in_method)
            .ok_or_else(|| corrupt("check_in_method", &row.check_in_method))?;
        let check_out_method = match row.check_out_method {
            Some(ref m) => Some(CheckMethod::parse(m).ok_or_else(|| corrupt("check_out_method", m))?),
            None => None,
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            business_id: row.business_id,
            work_date: row.work_date,
            status,
            check_in_time: row.check_in_time,
            check_in_method,
            check_in_location: point(row.check_in_latitude, row.check_in_longitude),
            check_out_time: row.check_out_time,
            check_out_method,
            check_out_location: point(row.check_out_latitude, row.check_out_longitude),
            work_duration_seconds: row.work_duration_seconds,
            break_duration_seconds: row.break_duration_seconds,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<BreakRow> for BreakInterval {
    type Error = AppError;

    fn try_from(row: BreakRow) -> Result<Self, Self::Error> {
        let break_type =
            BreakType::parse(&row.break_type).ok_or_else(|| corrupt("break_type", &row.break_type))?;
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            start_time: row.start_time,
            end_time: row.end_time,
            break_type,
        })
    }
}

/// Attendance ledger backed by `attendance_sessions` and `break_intervals`.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Load breaks for a set of sessions, grouped by session id.
async fn load_breaks<'e, E>(executor: E, session_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<BreakInterval>>, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query_as::<_, BreakRow>(
        r#"
        SELECT id, session_id, start_time, end_time, break_type
        FROM break_intervals
        WHERE session_id = ANY($1)
        ORDER BY start_time
        "#,
    )
    .bind(session_ids)
    .fetch_all(executor)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<BreakInterval>> = HashMap::new();
    for row in rows {
        let interval = BreakInterval::try_from(row)?;
        grouped.entry(interval.session_id).or_default().push(interval);
    }
    Ok(grouped)
}

fn assemble(
    rows: Vec<SessionRow>,
    mut breaks: HashMap<Uuid, Vec<BreakInterval>>,
) -> Result<Vec<SessionSnapshot>, AppError> {
    rows.into_iter()
        .map(|row| {
            let session = AttendanceSession::try_from(row)?;
            let breaks = breaks.remove(&session.id).unwrap_or_default();
            Ok(SessionSnapshot { session, breaks })
        })
        .collect()
}

fn key_lock_name(key: &SessionKey) -> String {
    format!("attendance:{}:{}:{}", key.user_id, key.business_id, key.work_date)
}

async fn lock_key(tx: &mut Transaction<'_, Postgres>, key: &SessionKey) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key_lock_name(key))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Load and lock the session matching `lookup` inside `tx`.
async fn load_locked(
    tx: &mut Transaction<'_, Postgres>,
    lookup: SessionLookup,
) -> Result<Option<SessionSnapshot>, AppError> {
    let row = match lookup {
        SessionLookup::ById(id) => {
            sqlx::query_as::<_, SessionRow>(&format!(
                "SELECT {} FROM attendance_sessions WHERE id = $1 FOR UPDATE",
                SESSION_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
        }
        SessionLookup::ByKey(key) => {
            lock_key(tx, &key).await?;
            sqlx::query_as::<_, SessionRow>(&format!(
                r#"
                SELECT {} FROM attendance_sessions
                WHERE user_id = $1 AND business_id = $2 AND work_date = $3
                FOR UPDATE
                "#,
                SESSION_COLUMNS
            ))
            .bind(key.user_id)
            .bind(key.business_id)
            .bind(key.work_date)
            .fetch_optional(&mut **tx)
            .await?
        }
    };

    let Some(row) = row else {
        return Ok(None);
    };
    let id = row.id;
    let breaks = load_breaks(&mut **tx, &[id]).await?;
    Ok(assemble(vec![row], breaks)?.pop())
}

async fn insert_session(
    tx: &mut Transaction<'_, Postgres>,
    session: &AttendanceSession,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO attendance_sessions (
            id, user_id, business_id, work_date, status,
            check_in_time, check_in_method, check_in_latitude, check_in_longitude,
            break_duration_seconds, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(session.business_id)
    .bind(session.work_date)
    .bind(session.status.as_str())
    .bind(session.check_in_time)
    .bind(session.check_in_method.as_str())
    .bind(session.check_in_location.map(|p| p.latitude))
    .bind(session.check_in_location.map(|p| p.longitude))
    .bind(session.break_duration_seconds)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        // Another transaction created today's row first.
        Err(sqlx::Error::Database(ref db)) if db.is_unique_violation() => {
            Err(AppError::AlreadyCheckedIn)
        }
        Err(e) => Err(e.into()),
    }
}

async fn update_session(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &SessionSnapshot,
) -> Result<(), AppError> {
    let session = &snapshot.session;
    let updated = sqlx::query(
        r#"
        UPDATE attendance_sessions
        SET status = $2,
            check_out_time = $3,
            check_out_method = $4,
            check_out_latitude = $5,
            check_out_longitude = $6,
            work_duration_seconds = $7,
            break_duration_seconds = $8,
            updated_at = $9
        WHERE id = $1
        "#,
    )
    .bind(session.id)
    .bind(session.status.as_str())
    .bind(session.check_out_time)
    .bind(session.check_out_method.map(|m| m.as_str()))
    .bind(session.check_out_location.map(|p| p.latitude))
    .bind(session.check_out_location.map(|p| p.longitude))
    .bind(session.work_duration_seconds)
    .bind(session.break_duration_seconds)
    .bind(session.updated_at)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::SessionNotFound);
    }

    // Closed intervals are immutable; only end_time of an open one changes.
    for interval in &snapshot.breaks {
        sqlx::query(
            r#"
            INSERT INTO break_intervals (id, session_id, start_time, end_time, break_type)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET end_time = EXCLUDED.end_time
            WHERE break_intervals.end_time IS NULL
            "#,
        )
        .bind(interval.id)
        .bind(interval.session_id)
        .bind(interval.start_time)
        .bind(interval.end_time)
        .bind(interval.break_type.as_str())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl Ledger for PgLedger {
    async fn get(&self, session_id: Uuid) -> Result<Option<SessionSnapshot>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM attendance_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let breaks = load_breaks(&self.pool, &[row.id]).await?;
        Ok(assemble(vec![row], breaks)?.pop())
    }

    async fn find(&self, key: &SessionKey) -> Result<Option<SessionSnapshot>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {} FROM attendance_sessions
            WHERE user_id = $1 AND business_id = $2 AND work_date = $3
            "#,
            SESSION_COLUMNS
        ))
        .bind(key.user_id)
        .bind(key.business_id)
        .bind(key.work_date)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let breaks = load_breaks(&self.pool, &[row.id]).await?;
        Ok(assemble(vec![row], breaks)?.pop())
    }

    async fn list(
        &self,
        user_id: Uuid,
        business_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SessionSnapshot>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            SELECT {} FROM attendance_sessions
            WHERE user_id = $1
              AND ($2::uuid IS NULL OR business_id = $2)
              AND work_date BETWEEN $3 AND $4
            ORDER BY work_date DESC, check_in_time DESC
            "#,
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .bind(business_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let breaks = load_breaks(&self.pool, &ids).await?;
        assemble(rows, breaks)
    }

    async fn apply(
        &self,
        lookup: SessionLookup,
        transition: Transition<'_>,
    ) -> Result<Option<SessionSnapshot>, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = load_locked(&mut tx, lookup).await?;

        // Dropping `tx` on an early return rolls back.
        let write = transition(current.as_ref())?;

        let written = match write {
            LedgerWrite::Insert(snapshot) => {
                if !matches!(lookup, SessionLookup::ByKey(_)) {
                    // Without the key lock the guard above proved nothing.
                    lock_key(&mut tx, &snapshot.session.key()).await?;
                }
                insert_session(&mut tx, &snapshot.session).await?;
                Some(snapshot)
            }
            LedgerWrite::Update(snapshot) => {
                update_session(&mut tx, &snapshot).await?;
                Some(snapshot)
            }
            LedgerWrite::Delete(id) => {
                let deleted = sqlx::query("DELETE FROM attendance_sessions WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                if deleted == 0 {
                    return Err(AppError::SessionNotFound);
                }
                None
            }
        };

        tx.commit().await?;
        Ok(written)
    }
}

/// Replay marks (`qr_token_uses`) and issued-token index (`qr_token_issues`).
#[derive(Debug, Clone)]
pub struct PgTokenStore {
    pool: DbPool,
}

impl PgTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Delete replay marks and issued-token entries that have lapsed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let uses = sqlx::query("DELETE FROM qr_token_uses WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let issues = sqlx::query("DELETE FROM qr_token_issues WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(uses + issues)
    }
}

#[async_trait]
impl ReplayStore for PgTokenStore {
    async fn check_and_mark(
        &self,
        token_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        // Single statement: inserts a fresh mark, or revives a lapsed one.
        // A live mark leaves the row untouched and returns no row. A fresh
        // mark also frees the token's issuance slot.
        let marked: i64 = sqlx::query_scalar(
            r#"
            WITH marked AS (
                INSERT INTO qr_token_uses (token_id, used_at, expires_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (token_id) DO UPDATE
                SET used_at = EXCLUDED.used_at, expires_at = EXCLUDED.expires_at
                WHERE qr_token_uses.expires_at < $2
                RETURNING token_id
            ),
            released AS (
                DELETE FROM qr_token_issues
                WHERE nonce IN (SELECT token_id FROM marked)
            )
            SELECT COUNT(*) FROM marked
            "#,
        )
        .bind(token_id)
        .bind(now)
        .bind(now + ttl)
        .fetch_one(&self.pool)
        .await?;

        Ok(marked == 1)
    }
}

#[async_trait]
impl TokenQuota for PgTokenStore {
    async fn try_reserve(
        &self,
        business_id: Uuid,
        nonce: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("qr-quota:{}", business_id))
            .execute(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM qr_token_issues WHERE business_id = $1 AND expires_at > $2",
        )
        .bind(business_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if active >= i64::from(limit) {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO qr_token_issues (nonce, business_id, issued_at, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(nonce)
        .bind(business_id)
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn active_count(&self, business_id: Uuid, now: DateTime<Utc>) -> Result<u32, AppError> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM qr_token_issues WHERE business_id = $1 AND expires_at > $2",
        )
        .bind(business_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(active).unwrap_or(u32::MAX))
    }
}

/// Worksite lookups against the `worksites` table.
#[derive(Debug, Clone)]
pub struct PgWorksiteRegistry {
    pool: DbPool,
}

impl PgWorksiteRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorksiteRegistry for PgWorksiteRegistry {
    async fn get(&self, business_id: Uuid) -> Result<Option<Worksite>, AppError> {
        let worksite = sqlx::query_as::<_, Worksite>(
            r#"
            SELECT business_id, name, latitude, longitude, radius_meters,
                   utc_offset_minutes, manager_id, created_at
            FROM worksites
            WHERE business_id = $1
            "#,
        )
        .bind(business_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(worksite)
    }
}

//! The PostgreSQL stores against a live database.
//!
//! Ignored by default. Run with a disposable database:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/attendance_test cargo test --test postgres_store -- --ignored
//! ```
//!
//! Every test registers its own worksite, so reruns do not collide.

mod common;

use std::sync::Arc;

use attendance_web_server::clock::ManualClock;
use attendance_web_server::db::{self, DbPool};
use attendance_web_server::error::AppError;
use attendance_web_server::models::attendance::{AttendanceStatus, BreakType, SessionTarget};
use attendance_web_server::models::worksite::Worksite;
use attendance_web_server::services::attendance_service::{AttendancePolicy, AttendanceService};
use attendance_web_server::services::qr_token::{
    DEFAULT_TOKEN_TTL_SECS, SigningKey, SigningKeys, TokenVerifier,
};
use attendance_web_server::store::postgres::{PgLedger, PgTokenStore, PgWorksiteRegistry};
use attendance_web_server::store::{ReplayStore, TokenQuota};
use chrono::Duration;
use common::{SEOUL_CITY_HALL, gps, start_of_shift, worksite};
use uuid::Uuid;

async fn pool() -> Option<DbPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = db::create_pool(&url, 10).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    Some(pool)
}

async fn register(pool: &DbPool, site: &Worksite) {
    sqlx::query(
        "INSERT INTO worksites
             (business_id, name, latitude, longitude, radius_meters, utc_offset_minutes, manager_id, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(site.business_id)
    .bind(&site.name)
    .bind(site.latitude)
    .bind(site.longitude)
    .bind(site.radius_meters)
    .bind(site.utc_offset_minutes)
    .bind(site.manager_id)
    .bind(site.created_at)
    .execute(pool)
    .await
    .unwrap();
}

fn service(pool: &DbPool, clock: Arc<ManualClock>) -> Arc<AttendanceService> {
    let tokens = Arc::new(PgTokenStore::new(pool.clone()));
    let keys = SigningKeys::new(
        SigningKey::new("k1", b"postgres-test-secret-0123456789ab".to_vec()),
        None,
    );
    let verifier = Arc::new(TokenVerifier::new(keys, tokens, clock.clone()));
    Arc::new(AttendanceService::new(
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(PgWorksiteRegistry::new(pool.clone())),
        verifier,
        clock,
        AttendancePolicy::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn concurrent_check_ins_write_one_row() {
    let Some(pool) = pool().await else { return };
    let site = worksite(SEOUL_CITY_HALL, 50.0);
    register(&pool, &site).await;
    let service = service(&pool, Arc::new(ManualClock::new(start_of_shift())));
    let worker = Uuid::new_v4();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let service = service.clone();
            let business_id = site.business_id;
            tokio::spawn(async move {
                service
                    .check_in(worker, business_id, gps(SEOUL_CITY_HALL))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyCheckedIn) => {}
            Err(other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(successes, 1);

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM attendance_sessions WHERE user_id = $1 AND business_id = $2",
    )
    .bind(worker)
    .bind(site.business_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn break_and_check_out_persist() {
    let Some(pool) = pool().await else { return };
    let site = worksite(SEOUL_CITY_HALL, 50.0);
    register(&pool, &site).await;
    let clock = Arc::new(ManualClock::new(start_of_shift()));
    let service = service(&pool, clock.clone());
    let worker = Uuid::new_v4();
    let today = SessionTarget::Today(site.business_id);

    service
        .check_in(worker, site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    clock.advance(Duration::hours(3));
    service
        .start_break(worker, today, BreakType::Lunch)
        .await
        .unwrap();
    let err = service
        .start_break(worker, today, BreakType::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyOnBreak));
    clock.advance(Duration::minutes(45));
    service.end_break(worker, today).await.unwrap();
    clock.advance(Duration::hours(4));

    let done = service
        .check_out(worker, today, Some(gps(SEOUL_CITY_HALL)))
        .await
        .unwrap();
    assert_eq!(done.session.status, AttendanceStatus::CheckedOut);
    assert_eq!(done.session.break_duration_seconds, 45 * 60);

    let reloaded = service.get_session(worker, done.session.id).await.unwrap();
    assert_eq!(reloaded.session.status, AttendanceStatus::CheckedOut);
    assert_eq!(
        reloaded.session.work_duration_seconds,
        Some((7 * 60 + 45) * 60 - 45 * 60)
    );
    assert_eq!(reloaded.breaks.len(), 1);
    assert!(reloaded.breaks[0].end_time.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn replay_marks_are_single_use_and_release_quota() {
    let Some(pool) = pool().await else { return };
    let site = worksite(SEOUL_CITY_HALL, 50.0);
    register(&pool, &site).await;
    let store = Arc::new(PgTokenStore::new(pool.clone()));
    let now = start_of_shift();
    let ttl = Duration::seconds(DEFAULT_TOKEN_TTL_SECS);
    let nonce = Uuid::new_v4().simple().to_string();

    assert!(store.try_reserve(site.business_id, &nonce, now + ttl, now, 1).await.unwrap());
    let other = Uuid::new_v4().simple().to_string();
    assert!(!store.try_reserve(site.business_id, &other, now + ttl, now, 1).await.unwrap());

    let racers: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            let nonce = nonce.clone();
            tokio::spawn(async move { store.check_and_mark(&nonce, ttl, now).await })
        })
        .collect();
    let mut marked = 0;
    for racer in racers {
        if racer.await.unwrap().unwrap() {
            marked += 1;
        }
    }
    assert_eq!(marked, 1);

    assert_eq!(store.active_count(site.business_id, now).await.unwrap(), 0);
    assert!(store.try_reserve(site.business_id, &other, now + ttl, now, 1).await.unwrap());
}

//! End-to-end behaviour of the attendance state machine on in-memory stores.

mod common;

use attendance_web_server::clock::Clock;
use attendance_web_server::error::AppError;
use attendance_web_server::models::attendance::{
    AttendanceStatus, BreakType, CheckMethod, SessionKey, SessionTarget,
};
use attendance_web_server::models::location::Coordinate;
use chrono::{Duration, NaiveDate};
use common::{GANGNAM_STATION, SEOUL_CITY_HALL, gps, harness, north_of};
use uuid::Uuid;

#[tokio::test]
async fn eight_hour_day_with_lunch_break() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let today = SessionTarget::Today(h.site.business_id);

    let checked_in = h
        .service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    assert_eq!(checked_in.session.status, AttendanceStatus::CheckedIn);
    assert_eq!(checked_in.session.check_in_method, CheckMethod::Gps);
    assert_eq!(checked_in.session.work_date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());

    h.clock.advance(Duration::hours(3));
    let on_break = h
        .service
        .start_break(user, today, BreakType::Lunch)
        .await
        .unwrap();
    assert_eq!(on_break.session.status, AttendanceStatus::OnBreak);
    assert_eq!(on_break.session.break_duration_seconds, 0);

    h.clock.advance(Duration::minutes(30));
    let back = h.service.end_break(user, today).await.unwrap();
    assert_eq!(back.session.status, AttendanceStatus::CheckedIn);
    assert_eq!(back.session.break_duration_seconds, 1800);

    h.clock.advance(Duration::minutes(270));
    let done = h
        .service
        .check_out(user, today, Some(gps(SEOUL_CITY_HALL)))
        .await
        .unwrap();
    assert_eq!(done.session.status, AttendanceStatus::CheckedOut);
    assert_eq!(done.session.break_duration_seconds, 1800);
    assert_eq!(done.session.work_duration_seconds, Some(27_000));
    assert_eq!(done.breaks.len(), 1);
    assert_eq!(done.breaks[0].break_type, BreakType::Lunch);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_admit_exactly_one() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let business_id = h.site.business_id;

    let attempts: Vec<_> = (0..5)
        .map(|_| {
            let service = h.service.clone();
            tokio::spawn(async move {
                service
                    .check_in(user, business_id, gps(SEOUL_CITY_HALL))
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    let mut conflicts = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AppError::AlreadyCheckedIn) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 4);

    let view = h.service.today(user, business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::CheckedIn);

    let key = SessionKey {
        user_id: user,
        business_id,
        work_date: view.work_date,
    };
    assert_eq!(h.ledger.count_for_key(&key).await, 1);
}

#[tokio::test]
async fn cancellation_respects_grace_window() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let today = SessionTarget::Today(h.site.business_id);

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(4));
    let key = h.service.cancel_check_in(user, today).await.unwrap();
    assert_eq!(key.business_id, h.site.business_id);

    let view = h.service.today(user, h.site.business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::NotCheckedIn);
    assert_eq!(view.session_id, None);

    // A cancelled day can be checked into again.
    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(6));
    let err = h.service.cancel_check_in(user, today).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::CancellationExpired {
            elapsed_secs: 360,
            grace_secs: 300
        }
    ));

    let view = h.service.today(user, h.site.business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::CheckedIn);
}

#[tokio::test]
async fn cancellation_is_refused_once_a_break_was_taken() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let today = SessionTarget::Today(h.site.business_id);

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(1));
    h.service
        .start_break(user, today, BreakType::Normal)
        .await
        .unwrap();

    let err = h.service.cancel_check_in(user, today).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_ON_BREAK");

    h.clock.advance(Duration::minutes(1));
    h.service.end_break(user, today).await.unwrap();
    let err = h.service.cancel_check_in(user, today).await.unwrap_err();
    assert_eq!(err.code(), "CANCELLATION_NOT_ALLOWED");
}

#[tokio::test]
async fn second_check_in_is_rejected() {
    let h = harness().await;
    let user = Uuid::new_v4();

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    let err = h
        .service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED_IN");

    h.clock.advance(Duration::hours(1));
    h.service
        .check_out(user, SessionTarget::Today(h.site.business_id), None)
        .await
        .unwrap();
    let err = h
        .service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED_OUT");
}

#[tokio::test]
async fn check_out_requires_an_active_check_in() {
    let h = harness().await;
    let user = Uuid::new_v4();

    let err = h
        .service
        .check_out(user, SessionTarget::Today(h.site.business_id), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_ACTIVE_CHECK_IN");

    let err = h
        .service
        .check_out(user, SessionTarget::Id(Uuid::new_v4()), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn break_transitions_are_guarded() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let today = SessionTarget::Today(h.site.business_id);

    let err = h
        .service
        .start_break(user, today, BreakType::Normal)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NO_ACTIVE_CHECK_IN");

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();

    let err = h.service.end_break(user, today).await.unwrap_err();
    assert_eq!(err.code(), "NOT_ON_BREAK");

    h.clock.advance(Duration::hours(1));
    h.service
        .start_break(user, today, BreakType::Normal)
        .await
        .unwrap();
    let err = h
        .service
        .start_break(user, today, BreakType::Normal)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_ON_BREAK");

    // Check-out while on break is refused; the break must be ended first.
    let err = h.service.check_out(user, today, None).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_ON_BREAK");

    h.clock.advance(Duration::minutes(15));
    h.service.end_break(user, today).await.unwrap();
    let done = h.service.check_out(user, today, None).await.unwrap();
    assert_eq!(done.session.break_duration_seconds, 900);
    assert_eq!(done.session.work_duration_seconds, Some(3600));
    assert_eq!(done.session.check_out_method, None);

    let err = h
        .service
        .start_break(user, today, BreakType::Normal)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED_OUT");
    let err = h.service.end_break(user, today).await.unwrap_err();
    assert_eq!(err.code(), "ALREADY_CHECKED_OUT");
}

#[tokio::test]
async fn geofence_violation_reports_distance_and_writes_nothing() {
    let h = harness().await;
    let user = Uuid::new_v4();

    let err = h
        .service
        .check_in(user, h.site.business_id, gps(north_of(SEOUL_CITY_HALL, 120.0)))
        .await
        .unwrap_err();
    match err {
        AppError::GeofenceViolation {
            distance_meters,
            limit_meters,
        } => {
            assert!((distance_meters - 120.0).abs() < 1.0, "{distance_meters}");
            assert_eq!(limit_meters, 50.0);
        }
        other => panic!("unexpected error: {other}"),
    }

    let view = h.service.today(user, h.site.business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::NotCheckedIn);
}

#[tokio::test]
async fn check_out_radius_is_lenient() {
    let h = harness().await;
    let near = Uuid::new_v4();
    let far = Uuid::new_v4();
    let today = SessionTarget::Today(h.site.business_id);

    for user in [near, far] {
        h.service
            .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
            .await
            .unwrap();
    }
    h.clock.advance(Duration::hours(2));

    // 80 m is outside the 50 m check-in radius but inside 2 x 50 m.
    let done = h
        .service
        .check_out(near, today, Some(gps(north_of(SEOUL_CITY_HALL, 80.0))))
        .await
        .unwrap();
    assert_eq!(done.session.check_out_method, Some(CheckMethod::Gps));
    assert!(done.session.check_out_location.is_some());

    let err = h
        .service
        .check_out(far, today, Some(gps(north_of(SEOUL_CITY_HALL, 120.0))))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::GeofenceViolation { limit_meters, .. } if limit_meters == 100.0
    ));
}

#[tokio::test]
async fn invalid_coordinates_and_unknown_worksites_are_rejected() {
    let h = harness().await;
    let user = Uuid::new_v4();

    let err = h
        .service
        .check_in(
            user,
            h.site.business_id,
            gps(Coordinate::new(95.0, 0.0)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .service
        .check_in(user, Uuid::new_v4(), gps(SEOUL_CITY_HALL))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WORKSITE_NOT_FOUND");
}

#[tokio::test]
async fn sessions_of_other_users_are_invisible() {
    let h = harness().await;
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    let session = h
        .service
        .check_in(owner, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    let id = session.session.id;

    let err = h.service.get_session(intruder, id).await.unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");
    let err = h
        .service
        .check_out(intruder, SessionTarget::Id(id), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_NOT_FOUND");

    let mine = h.service.get_session(owner, id).await.unwrap();
    assert_eq!(mine.session.status, AttendanceStatus::CheckedIn);

    // Addressing by id works for the owner.
    h.clock.advance(Duration::hours(1));
    let done = h
        .service
        .check_out(owner, SessionTarget::Id(id), None)
        .await
        .unwrap();
    assert_eq!(done.session.work_duration_seconds, Some(3600));
}

#[tokio::test]
async fn today_reports_open_break() {
    let h = harness().await;
    let user = Uuid::new_v4();

    let view = h.service.today(user, h.site.business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::NotCheckedIn);
    assert_eq!(view.work_date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.clock.advance(Duration::minutes(90));
    let break_start = h.clock.now();
    h.service
        .start_break(user, SessionTarget::Today(h.site.business_id), BreakType::Normal)
        .await
        .unwrap();

    let view = h.service.today(user, h.site.business_id).await.unwrap();
    assert_eq!(view.status, AttendanceStatus::OnBreak);
    assert_eq!(view.on_break_since, Some(break_start));
    assert_eq!(view.work_duration_seconds, None);
}

#[tokio::test]
async fn history_is_newest_first_and_bounded() {
    let h = harness().await;
    let user = Uuid::new_v4();
    let someone_else = Uuid::new_v4();

    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.service
        .check_in(someone_else, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();

    h.clock.advance(Duration::days(1));
    h.service
        .check_in(user, h.site.business_id, gps(SEOUL_CITY_HALL))
        .await
        .unwrap();
    h.service
        .check_in(user, h.other_site.business_id, gps(GANGNAM_STATION))
        .await
        .unwrap();

    let from = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let to = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();

    let all = h.service.history(user, None, from, to).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|s| s.session.user_id == user));
    assert_eq!(all[0].session.work_date, NaiveDate::from_ymd_opt(2025, 3, 4).unwrap());
    assert_eq!(all[2].session.work_date, NaiveDate::from_ymd_opt(2025, 3, 3).unwrap());

    let one_site = h
        .service
        .history(user, Some(h.site.business_id), from, to)
        .await
        .unwrap();
    assert_eq!(one_site.len(), 2);

    let too_long = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
    let err = h.service.history(user, None, from, too_long).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h.service.history(user, None, to, from).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

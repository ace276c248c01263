//! The `/api/v1` routes served from the in-memory stores.
//!
//! Authentication is replaced by a layer that trusts an `x-user-id` header,
//! so requests reach the handlers without an `api_keys` lookup. The pool is
//! lazy and never connected.

mod common;

use attendance_web_server::api_routes;
use attendance_web_server::error::AppError;
use attendance_web_server::middleware::auth::AuthContext;
use attendance_web_server::models::attendance::SessionKey;
use attendance_web_server::state::AppState;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use chrono::NaiveDate;
use common::{Harness, SEOUL_CITY_HALL, harness, north_of};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

async fn header_auth(mut request: axum::extract::Request, next: Next) -> Result<Response, AppError> {
    let user_id = request
        .headers()
        .get("x-user-id")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| Uuid::parse_str(h).ok())
        .ok_or(AppError::InvalidApiKey)?;

    request.extensions_mut().insert(AuthContext {
        user_id,
        display_name: "worker".to_string(),
    });
    Ok(next.run(request).await)
}

fn app(h: &Harness) -> Router {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy("postgres://localhost/attendance_test")
        .unwrap();
    let state = AppState {
        pool,
        attendance: h.service.clone(),
        issuer: h.issuer.clone(),
        verifier: h.verifier.clone(),
        worksites: h.worksites.clone(),
    };

    api_routes()
        .route_layer(middleware::from_fn(header_auth))
        .with_state(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user_id: Uuid,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user_id.to_string());
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn gps_at(latitude: f64, longitude: f64) -> Value {
    json!({ "method": "gps", "latitude": latitude, "longitude": longitude })
}

#[tokio::test]
async fn check_in_then_duplicate_conflicts() {
    let h = harness().await;
    let app = app(&h);
    let worker = Uuid::new_v4();
    let check_in = json!({
        "business_id": h.site.business_id,
        "evidence": gps_at(SEOUL_CITY_HALL.latitude, SEOUL_CITY_HALL.longitude),
    });

    let (status, body) = send(&app, "POST", "/api/v1/attendance/check-in", worker, Some(check_in.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "CHECKED_IN");
    assert_eq!(body["check_in_method"], "gps");
    assert_eq!(body["business_id"], h.site.business_id.to_string());

    let (status, body) = send(&app, "POST", "/api/v1/attendance/check-in", worker, Some(check_in)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_CHECKED_IN");
    let key = SessionKey {
        user_id: worker,
        business_id: h.site.business_id,
        work_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
    };
    assert_eq!(h.ledger.count_for_key(&key).await, 1);
}

#[tokio::test]
async fn geofence_violation_reports_distance() {
    let h = harness().await;
    let app = app(&h);
    let outside = north_of(SEOUL_CITY_HALL, 120.0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/attendance/check-in",
        Uuid::new_v4(),
        Some(json!({
            "business_id": h.site.business_id,
            "evidence": gps_at(outside.latitude, outside.longitude),
        })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "GEOFENCE_VIOLATION");
    let distance = body["error"]["details"]["distance_meters"].as_f64().unwrap();
    assert!((distance - 120.0).abs() < 1.0, "{distance}");
    assert_eq!(body["error"]["details"]["limit_meters"].as_f64(), Some(50.0));
}

#[tokio::test]
async fn check_out_without_check_in_conflicts() {
    let h = harness().await;
    let app = app(&h);

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/attendance/check-out",
        Uuid::new_v4(),
        Some(json!({ "business_id": h.site.business_id })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NO_ACTIVE_CHECK_IN");
}

#[tokio::test]
async fn target_must_name_exactly_one_field() {
    let h = harness().await;
    let app = app(&h);

    for body in [
        json!({ "session_id": Uuid::new_v4(), "business_id": h.site.business_id }),
        json!({}),
    ] {
        let (status, response) = send(&app, "POST", "/api/v1/attendance/breaks/end", Uuid::new_v4(), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn today_before_check_in_is_not_checked_in() {
    let h = harness().await;
    let app = app(&h);
    let uri = format!("/api/v1/attendance/today?business_id={}", h.site.business_id);

    let (status, body) = send(&app, "GET", &uri, Uuid::new_v4(), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "NOT_CHECKED_IN");
    assert_eq!(body["session_id"], Value::Null);
    assert_eq!(body["work_date"], "2025-03-03");
}

#[tokio::test]
async fn only_the_manager_issues_tokens() {
    let h = harness().await;
    let app = app(&h);
    let uri = format!("/api/v1/worksites/{}/qr-tokens", h.site.business_id);

    let (status, body) = send(&app, "POST", &uri, Uuid::new_v4(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, body) = send(&app, "POST", &uri, h.site.manager_id, Some(json!({ "ttl_secs": 60 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["business_id"], h.site.business_id.to_string());
    assert_eq!(body["active_tokens"], 1);
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let missing = format!("/api/v1/worksites/{}/qr-tokens", Uuid::new_v4());
    let (status, body) = send(&app, "POST", &missing, h.site.manager_id, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "WORKSITE_NOT_FOUND");
}

#[tokio::test]
async fn verify_consumes_the_token() {
    let h = harness().await;
    let app = app(&h);
    let issued = h.issuer.issue(h.site.business_id, None).await.unwrap();
    let body = json!({ "token": issued.token });

    let (status, first) = send(&app, "POST", "/api/v1/qr-tokens/verify", Uuid::new_v4(), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["valid"], true);
    assert_eq!(first["business_id"], h.site.business_id.to_string());

    let (status, second) = send(&app, "POST", "/api/v1/qr-tokens/verify", Uuid::new_v4(), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["valid"], false);
    assert_eq!(second["reason"], "TOKEN_ALREADY_USED");
}

#[tokio::test]
async fn requests_without_identity_are_rejected() {
    let h = harness().await;
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/api/v1/attendance/history?from=2025-03-01&to=2025-03-31")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#![allow(dead_code)]

use std::sync::Arc;

use attendance_web_server::clock::ManualClock;
use attendance_web_server::models::attendance::Evidence;
use attendance_web_server::models::location::Coordinate;
use attendance_web_server::models::worksite::Worksite;
use attendance_web_server::services::attendance_service::{AttendancePolicy, AttendanceService};
use attendance_web_server::services::geo::EARTH_RADIUS_METERS;
use attendance_web_server::services::qr_token::{
    DEFAULT_TOKEN_TTL_SECS, SigningKey, SigningKeys, TokenIssuer, TokenVerifier,
};
use attendance_web_server::store::memory::{MemoryLedger, MemoryTokenStore, MemoryWorksiteRegistry};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

pub const SEOUL_CITY_HALL: Coordinate = Coordinate::new(37.5665, 126.9780);
pub const GANGNAM_STATION: Coordinate = Coordinate::new(37.4979, 127.0276);

/// 09:00 in Seoul on a Monday.
pub fn start_of_shift() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
}

/// Point roughly `meters` due north of `origin`.
pub fn north_of(origin: Coordinate, meters: f64) -> Coordinate {
    let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
    Coordinate::new(origin.latitude + d_lat, origin.longitude)
}

pub fn gps(point: Coordinate) -> Evidence {
    Evidence::Gps(point)
}

pub fn worksite(center: Coordinate, radius_meters: f64) -> Worksite {
    Worksite {
        business_id: Uuid::new_v4(),
        name: "Depot".to_string(),
        latitude: center.latitude,
        longitude: center.longitude,
        radius_meters,
        utc_offset_minutes: 9 * 60,
        manager_id: Uuid::new_v4(),
        created_at: start_of_shift(),
    }
}

/// In-memory engine on a manual clock with two registered worksites.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub service: Arc<AttendanceService>,
    pub worksites: Arc<MemoryWorksiteRegistry>,
    /// 50 m around Seoul City Hall
    pub site: Worksite,
    /// 100 m around Gangnam Station
    pub other_site: Worksite,
}

pub async fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(start_of_shift()));
    let ledger = Arc::new(MemoryLedger::new());
    let tokens = Arc::new(MemoryTokenStore::new());
    let worksites = Arc::new(MemoryWorksiteRegistry::new());

    let site = worksite(SEOUL_CITY_HALL, 50.0);
    let other_site = worksite(GANGNAM_STATION, 100.0);
    worksites.insert(site.clone()).await;
    worksites.insert(other_site.clone()).await;

    let keys = SigningKeys::new(
        SigningKey::new("k1", b"integration-test-secret-0123456789".to_vec()),
        None,
    );
    let issuer = Arc::new(TokenIssuer::new(
        keys.clone(),
        tokens.clone(),
        clock.clone(),
        DEFAULT_TOKEN_TTL_SECS,
        5,
    ));
    let verifier = Arc::new(TokenVerifier::new(keys, tokens, clock.clone()));
    let service = Arc::new(AttendanceService::new(
        ledger.clone(),
        worksites.clone(),
        verifier.clone(),
        clock.clone(),
        AttendancePolicy::default(),
    ));

    Harness {
        clock,
        ledger,
        issuer,
        verifier,
        service,
        worksites,
        site,
        other_site,
    }
}

//! Worksite registry model.
//!
//! A worksite is the registered location of a business. It is the single
//! source of truth for the geofence centre and radius.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::location::Coordinate;

/// Represents a worksite record from the database.
///
/// # Database Table
///
/// Maps to the `worksites` table, one row per business.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Worksite {
    /// Business this worksite belongs to
    pub business_id: Uuid,

    pub name: String,

    pub latitude: f64,

    pub longitude: f64,

    /// Allowed check-in distance from the centre, in meters
    pub radius_meters: f64,

    /// Offset of the worksite's local time from UTC
    ///
    /// Determines which calendar day a check-in belongs to.
    pub utc_offset_minutes: i32,

    /// User allowed to issue QR tokens for this worksite
    pub manager_id: Uuid,

    pub created_at: DateTime<Utc>,
}

impl Worksite {
    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Local calendar date at the worksite for the given instant.
    pub fn work_date(&self, at: DateTime<Utc>) -> NaiveDate {
        (at + Duration::minutes(i64::from(self.utc_offset_minutes))).date_naive()
    }
}

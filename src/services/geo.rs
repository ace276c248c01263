//! Geofence calculations.
//!
//! Pure functions: great-circle distance, inclusive radius membership and
//! coordinate range validation.

use crate::{error::AppError, models::location::Coordinate};

/// Mean Earth radius used by the spherical model, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters (Haversine).
///
/// Identical points return exactly `0.0` without evaluating the formula.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Whether `point` lies within `radius_meters` of `center`, boundary included.
///
/// # Errors
///
/// - `Validation`: radius is negative or not finite
pub fn is_within_radius(
    center: Coordinate,
    point: Coordinate,
    radius_meters: f64,
) -> Result<bool, AppError> {
    validate_radius(radius_meters)?;
    Ok(distance(center, point) <= radius_meters)
}

/// Check a raw latitude/longitude pair and build a [`Coordinate`].
///
/// # Rules
///
/// - Both values finite
/// - Latitude within [-90, 90]
/// - Longitude within [-180, 180]
pub fn validate_coordinate(latitude: f64, longitude: f64) -> Result<Coordinate, AppError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(AppError::Validation(
            "Latitude and longitude must be finite numbers".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::Validation(format!(
            "Latitude {} is outside [-90, 90]",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::Validation(format!(
            "Longitude {} is outside [-180, 180]",
            longitude
        )));
    }
    Ok(Coordinate::new(latitude, longitude))
}

pub fn validate_radius(radius_meters: f64) -> Result<(), AppError> {
    if !radius_meters.is_finite() || radius_meters < 0.0 {
        return Err(AppError::Validation(format!(
            "Radius {} must be a non-negative number of meters",
            radius_meters
        )));
    }
    Ok(())
}

/// Enforce the geofence, reporting the measured distance on failure.
///
/// # Errors
///
/// - `Validation`: point out of range or radius invalid
/// - `GeofenceViolation`: point farther than `radius_meters` from `center`
pub fn ensure_within(
    center: Coordinate,
    point: Coordinate,
    radius_meters: f64,
) -> Result<f64, AppError> {
    let point = validate_coordinate(point.latitude, point.longitude)?;
    validate_radius(radius_meters)?;

    let measured = distance(center, point);
    if measured > radius_meters {
        return Err(AppError::GeofenceViolation {
            distance_meters: measured,
            limit_meters: radius_meters,
        });
    }
    Ok(measured)
}

/// Point roughly `meters` due north of `origin`. Test fixture helper.
#[cfg(test)]
pub(crate) fn offset_north(origin: Coordinate, meters: f64) -> Coordinate {
    let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
    Coordinate::new(origin.latitude + d_lat, origin.longitude)
}

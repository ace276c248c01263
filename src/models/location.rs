//! Geographic coordinate type.

use serde::{Deserialize, Serialize};

/// A WGS84 latitude/longitude pair in decimal degrees.
///
/// Deserialization does not range-check; values coming from requests go
/// through [`crate::services::geo::validate_coordinate`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

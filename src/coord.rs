//! Coordinates and great-circle distance.
//!
//! Distances use the haversine formula on a spherical Earth (R = 6 371 km),
//! which is well within the tolerance needed for a 200 m displacement check.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use thiserror::Error;

const DEG: f64 = PI / 180.0;
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 position. Always paired; never used per-axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside -90..90")]
    Latitude(f64),
    #[error("longitude {0} is outside -180..180")]
    Longitude(f64),
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::Longitude(longitude));
        }
        Ok(Self { latitude, longitude })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_coords(self.latitude, self.longitude))
    }
}

/// Great-circle distance in meters.
pub fn haversine(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude) * DEG;
    let d_lon = (b.longitude - a.longitude) * DEG;
    let h = (d_lat / 2.0).sin().powi(2)
        + (a.latitude * DEG).cos() * (b.latitude * DEG).cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Human label for a displacement: "120 m away" below a kilometre, "1.4 km away" above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m away", meters.round() as i64)
    } else {
        format!("{:.1} km away", meters / 1000.0)
    }
}

/// "12.9716°N, 77.5946°E"
pub fn format_coords(lat: f64, lon: f64) -> String {
    let ns = if lat >= 0.0 { 'N' } else { 'S' };
    let ew = if lon >= 0.0 { 'E' } else { 'W' };
    format!("{:.4}\u{00B0}{}, {:.4}\u{00B0}{}", lat.abs(), ns, lon.abs(), ew)
}

//! Outside-world ports: geocoding, device location, the map widget.
//!
//! The engine only talks to these traits. `NominatimGeocoder` is the real
//! geocoder; `FixedDeviceLocation` and `LoggingMap` stand in for a device
//! and a map on the command line and in the HTTP server.

use super::types::{
    AddressComponents, DeviceLocationError, FlyTo, GeocodeError, GeocodeResult, LocationOptions, Permission,
};
use crate::config::NominatimConfig;
use crate::coord::Coordinate;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

// ─── Ports ───────────────────────────────────────────────────────

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Address for a single point.
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<GeocodeResult, GeocodeError>;

    /// Free-text search, ranked toward `bias` when given.
    async fn forward_geocode(
        &self,
        query: &str,
        bias: Option<Coordinate>,
    ) -> Result<Vec<GeocodeResult>, GeocodeError>;
}

#[async_trait]
pub trait DeviceLocationProvider: Send + Sync {
    async fn check_permission(&self) -> Permission;
    async fn request_permission(&self) -> Permission;
    async fn current_coordinate(&self, options: LocationOptions) -> Result<Coordinate, DeviceLocationError>;
}

/// The interactive map. The engine only ever moves its camera.
pub trait MapWidget: Send + Sync {
    fn fly_to(&self, command: FlyTo);
}

// ─── Nominatim ───────────────────────────────────────────────────

/// Half-width, in degrees, of the search viewbox around the bias point.
const VIEWBOX_HALF_DEG: f64 = 0.25;

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    #[serde(default)]
    lat: Option<String>,
    #[serde(default)]
    lon: Option<String>,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    address: AddressComponents,
    /// Set instead of everything else when nothing is there.
    #[serde(default)]
    error: Option<String>,
}

/// OpenStreetMap Nominatim over HTTPS.
///
/// ureq is blocking, so each call runs on tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    config: NominatimConfig,
    agent: ureq::Agent,
}

impl NominatimGeocoder {
    pub fn new(config: NominatimConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(&config.user_agent)
            .build();
        Self { config, agent }
    }

    fn reverse_url(&self, c: Coordinate) -> String {
        format!(
            "{}/reverse?format=json&addressdetails=1&lat={}&lon={}",
            self.config.base_url.trim_end_matches('/'),
            c.latitude,
            c.longitude,
        )
    }

    fn search_url(&self, query: &str, bias: Option<Coordinate>) -> String {
        let viewbox = bias
            .map(|b| {
                // x1,y1,x2,y2 = west,north,east,south; not bounded, so it only ranks.
                format!(
                    "&viewbox={},{},{},{}",
                    b.longitude - VIEWBOX_HALF_DEG,
                    (b.latitude + VIEWBOX_HALF_DEG).min(90.0),
                    b.longitude + VIEWBOX_HALF_DEG,
                    (b.latitude - VIEWBOX_HALF_DEG).max(-90.0),
                )
            })
            .unwrap_or_default();
        format!(
            "{}/search?format=json&addressdetails=1&limit={}&q={}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.limit,
            urlencode(query),
            viewbox,
        )
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, GeocodeError> {
        debug!(url, "nominatim request");
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;
        response
            .into_json()
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))
    }

    fn reverse_blocking(&self, coordinate: Coordinate) -> Result<GeocodeResult, GeocodeError> {
        let place: NominatimPlace = self.get_json(&self.reverse_url(coordinate))?;
        if let Some(err) = place.error {
            return Err(GeocodeError::NotFound(format!("{} ({})", coordinate, err)));
        }
        place_to_result(place)
    }

    fn search_blocking(&self, query: &str, bias: Option<Coordinate>) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let places: Vec<NominatimPlace> = self.get_json(&self.search_url(query, bias))?;
        let results = places
            .into_iter()
            .filter(|p| p.error.is_none())
            .map(place_to_result)
            .collect::<Result<Vec<_>, _>>()?;
        info!(query, hits = results.len(), "nominatim search");
        Ok(results)
    }
}

#[async_trait]
impl GeocodingProvider for NominatimGeocoder {
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<GeocodeResult, GeocodeError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.reverse_blocking(coordinate))
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?
    }

    async fn forward_geocode(
        &self,
        query: &str,
        bias: Option<Coordinate>,
    ) -> Result<Vec<GeocodeResult>, GeocodeError> {
        let this = self.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || this.search_blocking(&query, bias))
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?
    }
}

fn place_to_result(place: NominatimPlace) -> Result<GeocodeResult, GeocodeError> {
    let parse = |field: Option<&str>, name: &str| -> Result<f64, GeocodeError> {
        field
            .ok_or_else(|| GeocodeError::InvalidResponse(format!("missing {}", name)))?
            .trim()
            .parse::<f64>()
            .map_err(|e| GeocodeError::InvalidResponse(format!("bad {}: {}", name, e)))
    };
    let lat = parse(place.lat.as_deref(), "lat")?;
    let lon = parse(place.lon.as_deref(), "lon")?;
    let coordinate = Coordinate::new(lat, lon).map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;
    Ok(GeocodeResult { display_name: place.display_name, address: place.address, coordinate })
}

// ─── Stand-ins ───────────────────────────────────────────────────

/// A device with a known fix, or none at all (permission denied).
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDeviceLocation {
    fix: Option<Coordinate>,
}

impl FixedDeviceLocation {
    pub fn new(fix: Option<Coordinate>) -> Self {
        Self { fix }
    }
}

#[async_trait]
impl DeviceLocationProvider for FixedDeviceLocation {
    async fn check_permission(&self) -> Permission {
        if self.fix.is_some() {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn request_permission(&self) -> Permission {
        self.check_permission().await
    }

    async fn current_coordinate(&self, _options: LocationOptions) -> Result<Coordinate, DeviceLocationError> {
        self.fix.ok_or(DeviceLocationError::PermissionDenied)
    }
}

/// Map without a screen: camera moves are logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMap;

impl MapWidget for LoggingMap {
    fn fly_to(&self, command: FlyTo) {
        info!(
            center = %command.coordinate,
            zoom = command.zoom,
            duration_ms = command.duration_ms,
            "map fly-to"
        );
    }
}

// ─── URL encoding (query values only) ────────────────────────────

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geocoder() -> NominatimGeocoder {
        NominatimGeocoder::new(NominatimConfig {
            base_url: "https://geo.example.org/".into(),
            ..Default::default()
        })
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("MG Road"), "MG%20Road");
        assert_eq!(urlencode("HXCV+JR"), "HXCV%2BJR");
        assert_eq!(urlencode("a&b=c,d"), "a%26b%3Dc%2Cd");
        assert_eq!(urlencode("Tromsø"), "Troms%C3%B8");
    }

    #[test]
    fn test_reverse_url() {
        let url = geocoder().reverse_url(Coordinate { latitude: 12.9716, longitude: 77.5946 });
        assert_eq!(
            url,
            "https://geo.example.org/reverse?format=json&addressdetails=1&lat=12.9716&lon=77.5946"
        );
    }

    #[test]
    fn test_search_url_with_bias() {
        let url = geocoder().search_url("MG Road", Some(Coordinate { latitude: 12.0, longitude: 77.0 }));
        assert!(url.starts_with("https://geo.example.org/search?format=json&addressdetails=1&limit=5&q=MG%20Road"));
        assert!(url.ends_with("&viewbox=76.75,12.25,77.25,11.75"), "{url}");

        let url = geocoder().search_url("MG Road", None);
        assert!(!url.contains("viewbox"));
    }

    #[test]
    fn test_place_to_result() {
        let place: NominatimPlace = serde_json::from_str(
            r#"{
                "lat": "12.9756", "lon": "77.6066",
                "display_name": "MG Road, Bengaluru, Karnataka, 560001, India",
                "address": {"road": "MG Road", "city": "Bengaluru", "state": "Karnataka",
                            "postcode": "560001", "country": "India", "country_code": "in"}
            }"#,
        )
        .unwrap();
        let r = place_to_result(place).unwrap();
        assert_eq!(r.address.road.as_deref(), Some("MG Road"));
        assert_eq!(r.address.city.as_deref(), Some("Bengaluru"));
        assert_eq!(r.coordinate, Coordinate { latitude: 12.9756, longitude: 77.6066 });
    }

    #[test]
    fn test_place_with_bad_coordinates() {
        let place: NominatimPlace = serde_json::from_str(r#"{"lat": "north", "lon": "1"}"#).unwrap();
        assert!(matches!(place_to_result(place), Err(GeocodeError::InvalidResponse(_))));

        let place: NominatimPlace = serde_json::from_str(r#"{"display_name": "x"}"#).unwrap();
        assert!(matches!(place_to_result(place), Err(GeocodeError::InvalidResponse(_))));
    }

    #[test]
    fn test_error_payload_parses() {
        let place: NominatimPlace = serde_json::from_str(r#"{"error": "Unable to geocode"}"#).unwrap();
        assert_eq!(place.error.as_deref(), Some("Unable to geocode"));
    }

    #[tokio::test]
    async fn test_fixed_device_location() {
        let here = Coordinate { latitude: 12.97, longitude: 77.59 };
        let device = FixedDeviceLocation::new(Some(here));
        assert_eq!(device.check_permission().await, Permission::Granted);
        assert_eq!(device.current_coordinate(LocationOptions::default()).await, Ok(here));

        let none = FixedDeviceLocation::new(None);
        assert_eq!(none.request_permission().await, Permission::Denied);
        assert_eq!(
            none.current_coordinate(LocationOptions::default()).await,
            Err(DeviceLocationError::PermissionDenied)
        );
    }
}

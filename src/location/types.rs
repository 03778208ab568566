//! Core types for the location subsystem.

use crate::coord::Coordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured address parts as returned by the geocoding provider.
///
/// Every field is optional; providers omit whatever they do not know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressComponents {
    #[serde(default)]
    pub road: Option<String>,
    #[serde(default)]
    pub house_number: Option<String>,
    #[serde(default)]
    pub suburb: Option<String>,
    #[serde(default)]
    pub neighbourhood: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl AddressComponents {
    /// City, falling back to town then village.
    pub fn locality(&self) -> Option<&str> {
        non_empty(&self.city)
            .or_else(|| non_empty(&self.town))
            .or_else(|| non_empty(&self.village))
    }
}

/// `Some` only for a non-blank value.
pub(crate) fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// One provider answer: a reverse lookup or a forward search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub display_name: String,
    #[serde(default)]
    pub address: AddressComponents,
    pub coordinate: Coordinate,
}

/// Failures from the remote geocoding provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeocodeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("no address found for {0}")]
    NotFound(String),
    #[error("geocoding request timed out after {0} ms")]
    Timeout(u64),
}

/// Device location permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
}

impl Default for LocationOptions {
    fn default() -> Self {
        Self { high_accuracy: true, timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceLocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location fix timed out")]
    Timeout,
    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Camera move the engine asks the map widget to perform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlyTo {
    pub coordinate: Coordinate,
    pub zoom: f64,
    pub duration_ms: u64,
}

/// Label attached to a saved address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressTag {
    Home,
    Work,
    Other(String),
}

impl AddressTag {
    /// Parse a user label; unknown labels become `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "home" => Self::Home,
            "work" | "office" => Self::Work,
            _ => Self::Other(label.trim().to_string()),
        }
    }
}

impl fmt::Display for AddressTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home => write!(f, "Home"),
            Self::Work => write!(f, "Work"),
            Self::Other(label) if label.trim().is_empty() => write!(f, "Other"),
            Self::Other(label) => write!(f, "{}", label.trim()),
        }
    }
}

/// A persisted delivery address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAddress {
    #[serde(default)]
    pub id: Option<String>,
    pub user_id: String,
    pub tag: AddressTag,
    pub house_or_flat: String,
    pub area_or_road: String,
    #[serde(default)]
    pub landmark: Option<String>,
    pub city: String,
    pub state: String,
    /// Always the full code; the abbreviated form is display-only.
    #[serde(default)]
    pub grid_code: Option<String>,
    pub contact_name: String,
    pub contact_phone: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Partial update for an existing address. `None` leaves a field alone.
///
/// The optional fields of an address take a nested option so a patch can
/// clear them: `Some(None)` removes the value, and an explicit JSON `null`
/// deserializes to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressPatch {
    pub tag: Option<AddressTag>,
    pub house_or_flat: Option<String>,
    pub area_or_road: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub landmark: Option<Option<String>>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub grid_code: Option<Option<String>>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub coordinate: Option<Coordinate>,
}

impl AddressPatch {
    /// Everything but ids, as a full overwrite.
    pub fn from_address(addr: &SavedAddress) -> Self {
        Self {
            tag: Some(addr.tag.clone()),
            house_or_flat: Some(addr.house_or_flat.clone()),
            area_or_road: Some(addr.area_or_road.clone()),
            landmark: Some(addr.landmark.clone()),
            city: Some(addr.city.clone()),
            state: Some(addr.state.clone()),
            grid_code: Some(addr.grid_code.clone()),
            contact_name: Some(addr.contact_name.clone()),
            contact_phone: Some(addr.contact_phone.clone()),
            coordinate: Some(addr.coordinate),
        }
    }

    pub fn apply(self, addr: &mut SavedAddress) {
        if let Some(v) = self.tag {
            addr.tag = v;
        }
        if let Some(v) = self.house_or_flat {
            addr.house_or_flat = v;
        }
        if let Some(v) = self.area_or_road {
            addr.area_or_road = v;
        }
        if let Some(v) = self.landmark {
            addr.landmark = v;
        }
        if let Some(v) = self.city {
            addr.city = v;
        }
        if let Some(v) = self.state {
            addr.state = v;
        }
        if let Some(v) = self.grid_code {
            addr.grid_code = v;
        }
        if let Some(v) = self.contact_name {
            addr.contact_name = v;
        }
        if let Some(v) = self.contact_phone {
            addr.contact_phone = v;
        }
        if let Some(v) = self.coordinate {
            addr.coordinate = v;
        }
    }
}

/// A field that is present, even as `null`, is `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// What the user types on the address details form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressDetails {
    pub tag: Option<AddressTag>,
    pub house_or_flat: String,
    /// Overrides the area derived from the pin.
    pub area_or_road: Option<String>,
    pub landmark: Option<String>,
    pub contact_name: String,
    pub contact_phone: String,
}

impl AddressDetails {
    /// Form rules: house, area and name required; phone is ten digits.
    ///
    /// `area` is the effective area after falling back to the pin's.
    pub fn validate(&self, area: &str) -> Result<(), &'static str> {
        if self.house_or_flat.trim().is_empty() {
            return Err("house_or_flat");
        }
        if area.trim().is_empty() {
            return Err("area_or_road");
        }
        if self.contact_name.trim().is_empty() {
            return Err("contact_name");
        }
        let phone = self.contact_phone.trim();
        if phone.len() != 10 || !phone.bytes().all(|b| b.is_ascii_digit()) {
            return Err("contact_phone");
        }
        Ok(())
    }
}

/// Failures from the address persistence adapter.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("address store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("address store is corrupt: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("address '{0}' not found")]
    NotFound(String),
    #[error("address store rejected the request: {0}")]
    Rejected(String),
}

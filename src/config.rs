//! Engine configuration, read from ~/.pinpoint/config.toml.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [session]
//! zoom_threshold = 16.0
//! displacement_warning_m = 200.0
//!
//! [nominatim]
//! base_url = "https://nominatim.openstreetmap.org"
//! ```

use crate::coord::Coordinate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub nominatim: NominatimConfig,
    pub store: StoreConfig,
}

/// Timing and gating knobs for a pin-drag session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Quiet period after a pan-end before reverse geocoding.
    pub reverse_debounce_ms: u64,
    /// Quiet period after a keystroke before searching.
    pub search_debounce_ms: u64,
    /// Upper bound on a single geocode/search call.
    pub geocode_timeout_ms: u64,
    /// Confirmation needs at least this map zoom.
    pub zoom_threshold: f64,
    /// Warn when the pin is farther than this from the GPS fix.
    pub displacement_warning_m: f64,
    pub fly_to_zoom: f64,
    pub fly_to_duration_ms: u64,
    /// Seed when neither GPS nor a previous map center is known.
    pub default_center: Coordinate,
    /// Leading digits hidden in the displayed plus code (2, 4 or 6).
    pub short_code_prefix: usize,
    /// Digits in stored plus codes (10 or 11).
    pub code_length: usize,
    pub device_timeout_ms: u64,
    pub high_accuracy: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reverse_debounce_ms: 1_000,
            search_debounce_ms: 500,
            geocode_timeout_ms: 10_000,
            zoom_threshold: 16.0,
            displacement_warning_m: 200.0,
            fly_to_zoom: 17.0,
            fly_to_duration_ms: 1_200,
            // Bengaluru
            default_center: Coordinate { latitude: 12.9716, longitude: 77.5946 },
            short_code_prefix: 4,
            code_length: 10,
            device_timeout_ms: 10_000,
            high_accuracy: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Forward search result cap.
    pub limit: usize,
    pub timeout_ms: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".into(),
            user_agent: format!("Pinpoint/{} (address-resolution)", env!("CARGO_PKG_VERSION")),
            limit: 5,
            timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Address file; defaults to ~/.pinpoint/addresses.json.
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| data_dir().join("addresses.json"))
    }
}

/// ~/.pinpoint, or ./.pinpoint without a home directory.
pub fn data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".pinpoint")
}

impl EngineConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (data_dir().join("config.toml"), false),
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        if !matches!(s.short_code_prefix, 2 | 4 | 6) {
            return Err(ConfigError::Invalid(format!(
                "session.short_code_prefix must be 2, 4 or 6, got {}",
                s.short_code_prefix
            )));
        }
        if !(crate::plus_code::PAIR_CODE_LENGTH..=crate::plus_code::MAX_CODE_LENGTH).contains(&s.code_length) {
            return Err(ConfigError::Invalid(format!(
                "session.code_length must be 10 or 11, got {}",
                s.code_length
            )));
        }
        if Coordinate::new(s.default_center.latitude, s.default_center.longitude).is_err() {
            return Err(ConfigError::Invalid("session.default_center is out of range".into()));
        }
        if s.geocode_timeout_ms == 0 {
            return Err(ConfigError::Invalid("session.geocode_timeout_ms must be positive".into()));
        }
        if self.nominatim.limit == 0 {
            return Err(ConfigError::Invalid("nominatim.limit must be positive".into()));
        }
        Ok(())
    }
}

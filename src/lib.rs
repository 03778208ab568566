//! Pinpoint: turn a dragged map pin into a deliverable address.
//!
//! - [`plus_code`]: Open Location Code encode, decode, shorten and recover
//! - [`coord`]: coordinates and haversine distance
//! - [`location`]: the pin-drag session, search, geocoding and storage
//! - [`server`]: JSON HTTP API over the same pieces

pub mod config;
pub mod coord;
pub mod location;
pub mod plus_code;
pub mod server;

pub use config::EngineConfig;
pub use coord::Coordinate;

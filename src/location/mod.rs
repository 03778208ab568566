//! Pin placement for Pinpoint.
//!
//! Turns a dragged map pin into a confirmed, persisted address: reverse
//! geocoding with stale-result suppression, hybrid text/plus-code search,
//! zoom and displacement checks, and the address store.

pub mod controller;
pub mod formatter;
pub mod providers;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;

pub use controller::{Ports, SessionController};
pub use providers::{
    DeviceLocationProvider, FixedDeviceLocation, GeocodingProvider, LoggingMap, MapWidget, NominatimGeocoder,
};
pub use resolver::HybridSearch;
pub use session::{
    ConfirmError, LocationCandidate, LocationSession, PinDescription, SessionContext, SessionState, SessionView,
};
pub use store::{AddressStore, JsonAddressStore};
pub use types::{
    AddressComponents, AddressDetails, AddressPatch, AddressTag, GeocodeError, GeocodeResult, PersistenceError,
    SavedAddress,
};

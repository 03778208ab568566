//! Async driver for a [`LocationSession`].
//!
//! Map and keyboard events come in as plain method calls. Network work runs
//! in spawned tasks that only touch the session through its mutex and never
//! hold the lock across an await. Debouncing is done by issuing the request
//! at pan-end, sleeping, and skipping the call if a newer generation showed
//! up in the meantime.

use super::providers::{DeviceLocationProvider, GeocodingProvider, MapWidget};
use super::resolver::HybridSearch;
use super::session::{ConfirmError, LocationSession, ReverseRequest, SessionContext, SessionView};
use super::store::AddressStore;
use super::types::{
    AddressDetails, AddressPatch, FlyTo, GeocodeError, GeocodeResult, LocationOptions, Permission, SavedAddress,
};
use crate::config::SessionConfig;
use crate::coord::Coordinate;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SearchState {
    generation: u64,
    query: String,
    results: Vec<GeocodeResult>,
}

/// The ports a controller talks to.
#[derive(Clone)]
pub struct Ports {
    pub geocoder: Arc<dyn GeocodingProvider>,
    pub device: Arc<dyn DeviceLocationProvider>,
    pub map: Arc<dyn MapWidget>,
    pub store: Arc<dyn AddressStore>,
}

#[derive(Clone)]
pub struct SessionController {
    session: Arc<Mutex<LocationSession>>,
    search_state: Arc<Mutex<SearchState>>,
    search: HybridSearch,
    ports: Ports,
    config: SessionConfig,
}

impl SessionController {
    pub fn new(config: SessionConfig, context: SessionContext, ports: Ports) -> Self {
        Self {
            session: Arc::new(Mutex::new(LocationSession::new(config.clone(), context))),
            search_state: Arc::new(Mutex::new(SearchState::default())),
            search: HybridSearch::new(ports.geocoder.clone()),
            ports,
            config,
        }
    }

    fn session(&self) -> MutexGuard<'_, LocationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn search_state(&self) -> MutexGuard<'_, SearchState> {
        self.search_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn view(&self) -> SessionView {
        self.session().view()
    }

    /// Ask for a device fix and seed the session with it.
    ///
    /// The first reverse geocode is not debounced.
    pub async fn start(&self) -> Option<JoinHandle<()>> {
        let fix = self.locate_device().await;
        let started = self.session().start(fix);
        let (fly, request) = started?;
        Some(self.move_and_resolve(fly, request))
    }

    /// Current device position, or `None` when permission is refused or
    /// the fix fails.
    pub async fn locate_device(&self) -> Option<Coordinate> {
        let device = &self.ports.device;
        let mut permission = device.check_permission().await;
        if permission == Permission::Prompt {
            permission = device.request_permission().await;
        }
        if permission != Permission::Granted {
            info!(?permission, "device location not available");
            return None;
        }

        let options = LocationOptions {
            high_accuracy: self.config.high_accuracy,
            timeout_ms: self.config.device_timeout_ms,
        };
        match timeout(Duration::from_millis(options.timeout_ms), device.current_coordinate(options)).await {
            Ok(Ok(fix)) => {
                debug!(fix = %fix, "device fix");
                Some(fix)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "device location failed");
                None
            }
            Err(_) => {
                warn!(timeout_ms = options.timeout_ms, "device location timed out");
                None
            }
        }
    }

    pub fn on_pan(&self, coordinate: Coordinate, zoom: f64) {
        self.session().pan(coordinate, zoom);
    }

    /// Map stopped; resolve the center once it has been still for the debounce.
    pub fn on_pan_end(&self, coordinate: Coordinate, zoom: f64) -> Option<JoinHandle<()>> {
        let request = self.session().pan_end(coordinate, zoom)?;
        Some(self.spawn_reverse(request, Duration::from_millis(self.config.reverse_debounce_ms)))
    }

    pub fn snap_to_grid(&self) -> Option<JoinHandle<()>> {
        let (fly, request) = self.session().snap_to_grid()?;
        Some(self.move_and_resolve(fly, request))
    }

    pub fn select_search_result(&self, result: &GeocodeResult) -> Option<JoinHandle<()>> {
        let (fly, request) = self.session().select_search_result(result)?;
        self.search_state().results.clear();
        Some(self.move_and_resolve(fly, request))
    }

    /// Refresh the device fix and bring the pin back to it.
    pub async fn use_current_location(&self) -> Option<JoinHandle<()>> {
        let fix = self.locate_device().await?;
        let moved = {
            let mut session = self.session();
            session.set_device_fix(fix);
            session.recenter_on_device()
        };
        let (fly, request) = moved?;
        Some(self.move_and_resolve(fly, request))
    }

    fn move_and_resolve(&self, fly: FlyTo, request: ReverseRequest) -> JoinHandle<()> {
        self.ports.map.fly_to(fly);
        self.spawn_reverse(request, Duration::ZERO)
    }

    fn spawn_reverse(&self, request: ReverseRequest, delay: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
                let current = this.session().is_current(&request);
                if !current {
                    debug!(generation = request.generation, "superseded before dispatch");
                    return;
                }
            }
            let outcome = this.reverse_with_timeout(request.coordinate).await;
            let applied = this.session().apply_reverse(&request, outcome);
            if applied {
                debug!(generation = request.generation, "candidate updated");
            }
        })
    }

    async fn reverse_with_timeout(&self, coordinate: Coordinate) -> Result<GeocodeResult, GeocodeError> {
        let limit = self.config.geocode_timeout_ms;
        timeout(Duration::from_millis(limit), self.ports.geocoder.reverse_geocode(coordinate))
            .await
            .unwrap_or(Err(GeocodeError::Timeout(limit)))
    }

    /// New search box text. Blank text clears the results at once; anything
    /// else is searched after the debounce, near the current pin.
    pub fn on_search_input(&self, text: &str) -> Option<JoinHandle<()>> {
        let generation = {
            let mut state = self.search_state();
            state.generation += 1;
            state.query = text.to_string();
            if text.trim().is_empty() {
                state.results.clear();
                return None;
            }
            state.generation
        };

        let this = self.clone();
        let query = text.to_string();
        let delay = Duration::from_millis(self.config.search_debounce_ms);
        Some(tokio::spawn(async move {
            sleep(delay).await;
            let superseded = this.search_state().generation != generation;
            if superseded {
                return;
            }
            let reference = this.session().candidate().coordinate;
            let limit = this.config.geocode_timeout_ms;
            let search = this.search.resolve_or_empty(&query, reference);
            let results = match timeout(Duration::from_millis(limit), search).await {
                Ok(results) => results,
                Err(_) => {
                    warn!(query, timeout_ms = limit, "search timed out");
                    Vec::new()
                }
            };
            let mut state = this.search_state();
            if state.generation == generation {
                state.results = results;
            }
        }))
    }

    pub fn search_results(&self) -> Vec<GeocodeResult> {
        self.search_state().results.clone()
    }

    pub fn search_query(&self) -> String {
        self.search_state().query.clone()
    }

    /// Save the pinned address and finish the session.
    ///
    /// Editing sessions update the original address; others create one.
    /// The session is frozen while the store works, so pans, discard and a
    /// second confirm are refused until it answers. On a store failure the
    /// session reopens and the error comes back unchanged.
    pub async fn confirm(&self, details: AddressDetails) -> Result<SavedAddress, ConfirmError> {
        let payload = self.session().begin_confirm(&details)?;

        let store = &self.ports.store;
        let outcome = match payload.id.clone() {
            Some(id) => store.update(&id, AddressPatch::from_address(&payload)).await,
            None => store.create(payload).await,
        };

        let mut session = self.session();
        let saved = match outcome {
            Ok(saved) => saved,
            Err(e) => {
                session.abort_confirm();
                return Err(e.into());
            }
        };
        session.mark_confirmed();
        info!(
            id = saved.id.as_deref().unwrap_or_default(),
            code = saved.grid_code.as_deref().unwrap_or_default(),
            "address confirmed"
        );
        Ok(saved)
    }

    pub fn discard(&self) -> bool {
        let discarded = self.session().discard();
        if discarded {
            self.search_state().results.clear();
        }
        discarded
    }
}

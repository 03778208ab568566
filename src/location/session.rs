//! The pin-drag session: one map, one pin, one candidate address.
//!
//! This is a plain state machine. It never awaits and never talks to the
//! network; the controller feeds it events and async results. Every
//! reverse-geocode request carries the generation it was issued under and
//! only the newest generation may change the candidate, so an answer for a
//! spot the user already dragged away from is dropped on arrival.
//!
//! ```text
//!   Idle --start--> Loading --result--> Resolved --confirm--> Confirming --saved--> Confirmed
//!                      ^                    |    ^                    |
//!                      +------pan-end-------+    +---store failed-----+
//!
//!   (any but Confirming) --discard--> Discarded
//! ```
//!
//! While a confirm is being written the pin is frozen: moves, discard and a
//! second confirm are refused until the store answers.

use super::formatter::{build_full_line, build_title};
use super::types::{
    AddressComponents, AddressDetails, AddressTag, FlyTo, GeocodeError, GeocodeResult, PersistenceError, SavedAddress,
};
use crate::config::SessionConfig;
use crate::coord::{format_distance, haversine, Coordinate};
use crate::plus_code;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const LOCATION_NOT_FOUND: &str = "Location not found";
pub const NOT_FOUND_LINE: &str = "Sorry, we couldn't find an address for this spot. Try moving the pin.";

/// Snapping only nudges the pin, so the hop is short.
const SNAP_DURATION_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Loading,
    Resolved,
    Confirming,
    Confirmed,
    Discarded,
}

impl SessionState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Confirmed | Self::Discarded)
    }

    /// Finished, or waiting on the store.
    pub fn is_frozen(self) -> bool {
        self.is_finished() || self == Self::Confirming
    }
}

/// What the pin currently points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCandidate {
    pub coordinate: Coordinate,
    pub title: String,
    pub address_line: String,
    /// Display form of the plus code; the prefix is dropped.
    pub grid_code_short: Option<String>,
    /// Full plus code. This is what gets stored.
    pub grid_code: Option<String>,
    pub components: Option<AddressComponents>,
    pub is_loading: bool,
    pub is_dragging: bool,
    /// Meters between the pin and the device fix, when there is a fix.
    pub displacement_meters: Option<f64>,
}

impl LocationCandidate {
    fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            title: String::new(),
            address_line: String::new(),
            grid_code_short: None,
            grid_code: None,
            components: None,
            is_loading: false,
            is_dragging: false,
            displacement_meters: None,
        }
    }
}

/// Title, line and codes for one resolved point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinDescription {
    pub coordinate: Coordinate,
    pub title: String,
    pub address_line: String,
    pub grid_code: String,
    pub grid_code_short: String,
    pub components: AddressComponents,
}

impl PinDescription {
    /// Describe `coordinate` using a provider answer for it.
    pub fn from_result(
        result: &GeocodeResult,
        coordinate: Coordinate,
        code_length: usize,
        short_prefix: usize,
    ) -> Result<Self, plus_code::CodeError> {
        let grid_code = plus_code::encode_with_length(coordinate, code_length)?;
        let grid_code_short = plus_code::shorten(&grid_code, short_prefix)?;
        Ok(Self {
            coordinate,
            title: build_title(&result.address),
            address_line: build_full_line(&result.address, &result.display_name),
            grid_code,
            grid_code_short,
            components: result.address.clone(),
        })
    }
}

/// A reverse-geocode the controller must run, tagged with its generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseRequest {
    pub generation: u64,
    pub coordinate: Coordinate,
}

/// Who is placing the pin and from where.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub user_id: String,
    /// Map center from the previous visit, if any.
    pub previous_center: Option<Coordinate>,
    /// Set when re-placing an existing address; confirm then updates it.
    pub editing: Option<SavedAddress>,
}

#[derive(Debug, Error)]
pub enum ConfirmError {
    #[error("the pin has no resolved address yet")]
    NotResolved,
    #[error("the pin is still being dragged")]
    Dragging,
    #[error("zoom {zoom:.1} is below {threshold:.1}; zoom in to place the pin precisely")]
    BelowZoomThreshold { zoom: f64, threshold: f64 },
    #[error("a confirm is already being saved")]
    InProgress,
    #[error("the session has already finished")]
    Finished,
    #[error("missing or invalid field: {0}")]
    InvalidDetails(&'static str),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Everything a screen needs to draw the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub candidate: LocationCandidate,
    pub zoom: f64,
    pub below_zoom_threshold: bool,
    pub displacement_warning_active: bool,
    pub displacement_label: Option<String>,
    pub can_confirm: bool,
}

pub struct LocationSession {
    config: SessionConfig,
    context: SessionContext,
    state: SessionState,
    candidate: LocationCandidate,
    zoom: f64,
    device_fix: Option<Coordinate>,
    generation: u64,
}

impl LocationSession {
    pub fn new(config: SessionConfig, context: SessionContext) -> Self {
        let seed = context
            .editing
            .as_ref()
            .map(|a| a.coordinate)
            .or(context.previous_center)
            .unwrap_or(config.default_center);
        let zoom = config.fly_to_zoom;
        Self {
            config,
            context,
            state: SessionState::Idle,
            candidate: LocationCandidate::at(seed),
            zoom,
            device_fix: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn candidate(&self) -> &LocationCandidate {
        &self.candidate
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Seed the pin and ask for its first address.
    ///
    /// The seed is the edited address, else the device fix, else the
    /// previous map center, else the configured default. Calling this
    /// again on a live session restarts from the same rules.
    pub fn start(&mut self, device_fix: Option<Coordinate>) -> Option<(FlyTo, ReverseRequest)> {
        if self.state.is_frozen() {
            return None;
        }
        self.device_fix = device_fix.or(self.device_fix);
        let seed = self
            .context
            .editing
            .as_ref()
            .map(|a| a.coordinate)
            .or(device_fix)
            .or(self.context.previous_center)
            .unwrap_or(self.config.default_center);
        debug!(seed = %seed, "session start");
        self.candidate = LocationCandidate::at(seed);
        self.zoom = self.config.fly_to_zoom;
        let fly = self.fly_to(seed, self.config.fly_to_duration_ms);
        Some((fly, self.issue_request()))
    }

    /// The map is moving; the pin follows the center.
    pub fn pan(&mut self, coordinate: Coordinate, zoom: f64) {
        if self.state.is_frozen() {
            return;
        }
        self.candidate.coordinate = coordinate;
        self.candidate.is_dragging = true;
        self.zoom = zoom;
    }

    /// The map stopped moving. Returns the request to run after the debounce.
    pub fn pan_end(&mut self, coordinate: Coordinate, zoom: f64) -> Option<ReverseRequest> {
        if self.state.is_frozen() {
            return None;
        }
        self.candidate.coordinate = coordinate;
        self.candidate.is_dragging = false;
        self.zoom = zoom;
        Some(self.issue_request())
    }

    fn issue_request(&mut self) -> ReverseRequest {
        self.generation += 1;
        self.state = SessionState::Loading;
        self.candidate.is_loading = true;
        ReverseRequest { generation: self.generation, coordinate: self.candidate.coordinate }
    }

    /// Still worth running or applying `request`?
    pub fn is_current(&self, request: &ReverseRequest) -> bool {
        !self.state.is_frozen() && request.generation == self.generation
    }

    /// Apply a reverse-geocode outcome. Returns false if it was stale.
    ///
    /// A failure still resolves the session, with a "not found" candidate
    /// the user can fix by moving the pin.
    pub fn apply_reverse(&mut self, request: &ReverseRequest, outcome: Result<GeocodeResult, GeocodeError>) -> bool {
        if !self.is_current(request) {
            debug!(
                generation = request.generation,
                current = self.generation,
                "dropping stale reverse geocode"
            );
            return false;
        }

        let described = outcome.map_err(|e| e.to_string()).and_then(|result| {
            PinDescription::from_result(
                &result,
                request.coordinate,
                self.config.code_length,
                self.config.short_code_prefix,
            )
            .map_err(|e| e.to_string())
        });

        // Mid-drag the pin stays under the finger; pan-end asks again.
        let is_dragging = self.candidate.is_dragging;
        let live = self.candidate.coordinate;
        self.candidate = match described {
            Ok(pin) => LocationCandidate {
                coordinate: if is_dragging { live } else { pin.coordinate },
                title: pin.title,
                address_line: pin.address_line,
                grid_code_short: Some(pin.grid_code_short),
                grid_code: Some(pin.grid_code),
                components: Some(pin.components),
                is_loading: false,
                is_dragging,
                displacement_meters: self.device_fix.map(|fix| haversine(fix, pin.coordinate)),
            },
            Err(reason) => {
                warn!(at = %request.coordinate, %reason, "reverse geocode failed");
                LocationCandidate {
                    title: LOCATION_NOT_FOUND.to_string(),
                    address_line: NOT_FOUND_LINE.to_string(),
                    is_dragging,
                    ..LocationCandidate::at(if is_dragging { live } else { request.coordinate })
                }
            }
        };
        self.state = SessionState::Resolved;
        true
    }

    /// Move the pin to the center of its plus-code cell and re-resolve.
    pub fn snap_to_grid(&mut self) -> Option<(FlyTo, ReverseRequest)> {
        if self.state.is_frozen() {
            return None;
        }
        let snapped = match plus_code::snap(self.candidate.coordinate) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot snap pin");
                return None;
            }
        };
        let fly = FlyTo { coordinate: snapped, zoom: self.zoom, duration_ms: SNAP_DURATION_MS };
        self.candidate.coordinate = snapped;
        self.candidate.is_dragging = false;
        Some((fly, self.issue_request()))
    }

    /// Fly to a search hit and resolve the spot it lands on.
    pub fn select_search_result(&mut self, result: &GeocodeResult) -> Option<(FlyTo, ReverseRequest)> {
        self.jump_to(result.coordinate)
    }

    /// Record a fresh device fix; the displacement follows it.
    pub fn set_device_fix(&mut self, fix: Coordinate) {
        self.device_fix = Some(fix);
        if self.candidate.grid_code.is_some() {
            self.candidate.displacement_meters = Some(haversine(fix, self.candidate.coordinate));
        }
    }

    pub fn device_fix(&self) -> Option<Coordinate> {
        self.device_fix
    }

    /// Bring the pin back to the device fix. `None` without a fix.
    pub fn recenter_on_device(&mut self) -> Option<(FlyTo, ReverseRequest)> {
        let fix = self.device_fix?;
        self.jump_to(fix)
    }

    fn jump_to(&mut self, coordinate: Coordinate) -> Option<(FlyTo, ReverseRequest)> {
        if self.state.is_frozen() {
            return None;
        }
        self.zoom = self.zoom.max(self.config.fly_to_zoom);
        let fly = self.fly_to(coordinate, self.config.fly_to_duration_ms);
        self.candidate.coordinate = coordinate;
        self.candidate.is_dragging = false;
        Some((fly, self.issue_request()))
    }

    fn fly_to(&self, coordinate: Coordinate, duration_ms: u64) -> FlyTo {
        FlyTo { coordinate, zoom: self.zoom, duration_ms }
    }

    pub fn below_zoom_threshold(&self) -> bool {
        self.zoom < self.config.zoom_threshold
    }

    pub fn displacement_warning_active(&self) -> bool {
        self.candidate
            .displacement_meters
            .is_some_and(|d| d > self.config.displacement_warning_m)
    }

    fn check_confirmable(&self) -> Result<(), ConfirmError> {
        match self.state {
            SessionState::Confirmed | SessionState::Discarded => return Err(ConfirmError::Finished),
            SessionState::Confirming => return Err(ConfirmError::InProgress),
            SessionState::Idle | SessionState::Loading => return Err(ConfirmError::NotResolved),
            SessionState::Resolved => {}
        }
        if self.candidate.is_dragging {
            return Err(ConfirmError::Dragging);
        }
        if self.below_zoom_threshold() {
            return Err(ConfirmError::BelowZoomThreshold { zoom: self.zoom, threshold: self.config.zoom_threshold });
        }
        Ok(())
    }

    /// The address `details` would save, if the session may confirm now.
    ///
    /// Nothing changes here. [`begin_confirm`](Self::begin_confirm) is the
    /// mutating version.
    pub fn prepare_confirm(&self, details: &AddressDetails) -> Result<SavedAddress, ConfirmError> {
        self.check_confirmable()?;

        let components = self.candidate.components.clone().unwrap_or_default();
        let derived_area = components
            .road
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| Some(self.candidate.title.clone()).filter(|t| !t.is_empty() && t != LOCATION_NOT_FOUND));
        let area = details
            .area_or_road
            .clone()
            .filter(|a| !a.trim().is_empty())
            .or(derived_area)
            .unwrap_or_default();
        details.validate(&area).map_err(ConfirmError::InvalidDetails)?;

        let editing = self.context.editing.as_ref();
        Ok(SavedAddress {
            id: editing.and_then(|a| a.id.clone()),
            user_id: self.context.user_id.clone(),
            tag: details
                .tag
                .clone()
                .or_else(|| editing.map(|a| a.tag.clone()))
                .unwrap_or(AddressTag::Home),
            house_or_flat: details.house_or_flat.trim().to_string(),
            area_or_road: area.trim().to_string(),
            landmark: details
                .landmark
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            city: components.locality().unwrap_or_default().to_string(),
            state: components.state.clone().unwrap_or_default(),
            grid_code: self.candidate.grid_code.clone(),
            contact_name: details.contact_name.trim().to_string(),
            contact_phone: details.contact_phone.trim().to_string(),
            coordinate: self.candidate.coordinate,
            created_at: editing.and_then(|a| a.created_at),
        })
    }

    /// Like [`prepare_confirm`](Self::prepare_confirm), but freezes the
    /// session until [`mark_confirmed`](Self::mark_confirmed) or
    /// [`abort_confirm`](Self::abort_confirm).
    pub fn begin_confirm(&mut self, details: &AddressDetails) -> Result<SavedAddress, ConfirmError> {
        let payload = self.prepare_confirm(details)?;
        self.state = SessionState::Confirming;
        Ok(payload)
    }

    /// The store accepted the address. Only a pending confirm can finish.
    pub fn mark_confirmed(&mut self) -> bool {
        if self.state != SessionState::Confirming {
            return false;
        }
        self.state = SessionState::Confirmed;
        self.candidate.is_loading = false;
        true
    }

    /// The store refused the address; the pin is live again.
    pub fn abort_confirm(&mut self) {
        if self.state == SessionState::Confirming {
            self.state = SessionState::Resolved;
        }
    }

    /// Leave without saving. In-flight results are ignored from now on.
    ///
    /// Refused while a confirm is being written.
    pub fn discard(&mut self) -> bool {
        if self.state.is_frozen() {
            return false;
        }
        self.state = SessionState::Discarded;
        self.candidate.is_loading = false;
        true
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            candidate: self.candidate.clone(),
            zoom: self.zoom,
            below_zoom_threshold: self.below_zoom_threshold(),
            displacement_warning_active: self.displacement_warning_active(),
            displacement_label: self.candidate.displacement_meters.map(format_distance),
            can_confirm: self.check_confirmable().is_ok(),
        }
    }
}

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::coord::{format_coords, format_distance, haversine, Coordinate};
use crate::location::{GeocodeError, GeocodeResult, PersistenceError, PinDescription, SavedAddress};
use crate::plus_code::{self, CellSize, CodeArea};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

impl From<GeocodeError> for ApiError {
    fn from(e: GeocodeError) -> Self {
        let status = match e {
            GeocodeError::NotFound(_) => StatusCode::NOT_FOUND,
            GeocodeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GeocodeError::Network(_) | GeocodeError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        };
        api_error(status, e.to_string())
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        let status = match e {
            PersistenceError::NotFound(_) => StatusCode::NOT_FOUND,
            PersistenceError::Rejected(_) => StatusCode::BAD_REQUEST,
            PersistenceError::Io(_) | PersistenceError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    }
}

fn required_point(lat: Option<f64>, lon: Option<f64>) -> Result<Coordinate, ApiError> {
    optional_point(lat, lon)?.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Provide 'lat' and 'lon' parameters"))
}

fn optional_point(lat: Option<f64>, lon: Option<f64>) -> Result<Option<Coordinate>, ApiError> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon)
            .map(Some)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid coordinates: {}", e))),
        (None, None) => Ok(None),
        _ => Err(api_error(StatusCode::BAD_REQUEST, "'lat' and 'lon' go together")),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

// ─── GET /api/reverse ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReverseQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Device fix, for the displacement fields.
    pub from_lat: Option<f64>,
    pub from_lon: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ReverseResponse {
    #[serde(flatten)]
    pub pin: PinDescription,
    pub display_name: String,
    pub formatted_coords: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displacement_meters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displacement_label: Option<String>,
    pub displacement_warning: bool,
}

pub async fn reverse(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReverseQuery>,
) -> Result<Json<ReverseResponse>, ApiError> {
    let start = Instant::now();
    let point = required_point(params.lat, params.lon)?;
    let fix = optional_point(params.from_lat, params.from_lon)?;
    let session = &state.config.session;

    let cell = plus_code::encode(point);
    let cached = state.reverse_cache().get(&cell);
    let (result, from_cache) = match cached {
        Some(hit) => (hit, true),
        None => {
            let limit = session.geocode_timeout_ms;
            let result = tokio::time::timeout(Duration::from_millis(limit), state.geocoder.reverse_geocode(point))
                .await
                .unwrap_or(Err(GeocodeError::Timeout(limit)))?;
            state.reverse_cache().insert(cell, result.clone());
            (result, false)
        }
    };

    let pin = PinDescription::from_result(&result, point, session.code_length, session.short_code_prefix)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let displacement = fix.map(|f| haversine(f, point));

    info!(
        at = %point,
        title = %pin.title,
        cached = from_cache,
        ms = elapsed_ms(start),
        "GET /api/reverse"
    );

    Ok(Json(ReverseResponse {
        display_name: result.display_name,
        formatted_coords: format_coords(point.latitude, point.longitude),
        displacement_meters: displacement,
        displacement_label: displacement.map(format_distance),
        displacement_warning: displacement.is_some_and(|d| d > session.displacement_warning_m),
        pin,
    }))
}

// ─── GET /api/search ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub display_name: String,
    pub coordinate: Coordinate,
    pub plus_code: String,
    pub formatted_coords: String,
}

impl From<GeocodeResult> for SearchHit {
    fn from(r: GeocodeResult) -> Self {
        Self {
            plus_code: plus_code::encode(r.coordinate),
            formatted_coords: format_coords(r.coordinate.latitude, r.coordinate.longitude),
            coordinate: r.coordinate,
            display_name: r.display_name,
        }
    }
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let start = Instant::now();
    let query = params.q.unwrap_or_default();
    // Searches are ranked around the caller's pin; there is no silent default.
    let reference = required_point(params.lat, params.lon)?;

    let limit = state.config.session.geocode_timeout_ms;
    let results = tokio::time::timeout(Duration::from_millis(limit), state.search.resolve(&query, reference))
        .await
        .unwrap_or(Err(GeocodeError::Timeout(limit)))?;

    info!(query = %query.trim(), hits = results.len(), ms = elapsed_ms(start), "GET /api/search");
    Ok(Json(results.into_iter().map(SearchHit::from).collect()))
}

// ─── GET /api/codes/{code} ───────────────────────────────────────

#[derive(Deserialize)]
pub struct CodeQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: String,
    pub short: String,
    pub center: Coordinate,
    pub area: CodeArea,
    pub cell_size: CellSize,
}

pub async fn code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(params): Query<CodeQuery>,
) -> Result<Json<CodeResponse>, ApiError> {
    let bad_request = |e: plus_code::CodeError| api_error(StatusCode::BAD_REQUEST, e.to_string());
    let full = if plus_code::is_full(&code) {
        code.trim().to_uppercase()
    } else {
        let reference = optional_point(params.lat, params.lon)?.ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("'{}' is not a full code; provide 'lat' and 'lon' to recover it", code),
            )
        })?;
        plus_code::recover_nearest(&code, reference).map_err(bad_request)?
    };
    let area = plus_code::decode(&full).map_err(bad_request)?;
    let short = plus_code::shorten(&full, state.config.session.short_code_prefix).map_err(bad_request)?;

    info!(code = %code, full = %full, "GET /api/codes");
    Ok(Json(CodeResponse {
        center: area.center(),
        cell_size: area.cell_size(),
        short,
        area,
        code: full,
    }))
}

// ─── GET /api/distance ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct DistanceQuery {
    pub from_lat: Option<f64>,
    pub from_lon: Option<f64>,
    pub to_lat: Option<f64>,
    pub to_lon: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct DistanceResponse {
    pub meters: f64,
    pub label: String,
}

pub async fn distance(Query(params): Query<DistanceQuery>) -> Result<Json<DistanceResponse>, ApiError> {
    let from = required_point(params.from_lat, params.from_lon)?;
    let to = required_point(params.to_lat, params.to_lon)?;
    let meters = haversine(from, to);
    Ok(Json(DistanceResponse { meters, label: format_distance(meters) }))
}

// ─── /api/addresses ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddressesQuery {
    pub user: Option<String>,
}

pub async fn list_addresses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AddressesQuery>,
) -> Result<Json<Vec<SavedAddress>>, ApiError> {
    let user = params.user.as_deref().unwrap_or("").trim();
    if user.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing 'user' parameter"));
    }
    let list = state.store.list(user).await?;
    info!(user, count = list.len(), "GET /api/addresses");
    Ok(Json(list))
}

pub async fn delete_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&id).await?;
    info!(id = %id, "DELETE /api/addresses");
    Ok(StatusCode::NO_CONTENT)
}

mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::{delete, get};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

pub use state::{AppState, ReverseCache};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/reverse", get(handlers::reverse))
        .route("/api/search", get(handlers::search))
        .route("/api/codes/{code}", get(handlers::code))
        .route("/api/distance", get(handlers::distance))
        .route("/api/addresses", get(handlers::list_addresses))
        .route("/api/addresses/{id}", delete(handlers::delete_address))
        // Responses carry personal addresses and live positions.
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, state: Arc<AppState>) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(%addr, "pinpoint server listening");
    eprintln!("  Pinpoint server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}

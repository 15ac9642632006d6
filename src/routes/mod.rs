//! HTTP routes and router assembly.
//!
//! DESIGN
//! ======
//! One websocket endpoint carries all realtime traffic; everything else is
//! static assets for the canvas frontend plus a health probe. CORS is wide
//! open since the service speaks only ephemeral drawing state.

use axum::Router;
use axum::routing::{any, get};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod ws;

/// Directory served at `/` when `STATIC_DIR` is unset.
const DEFAULT_STATIC_DIR: &str = "static";

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let static_dir =
        std::env::var("STATIC_DIR").unwrap_or_else(|_| DEFAULT_STATIC_DIR.to_string());

    Router::new()
        .route("/api/ws", any(ws::handle_ws))
        .route("/healthz", get(healthz))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

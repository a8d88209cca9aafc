//! HTTP surface: token issuance, token resolution and the gated overlay page.

pub mod overlay;
pub mod tokens;

pub use overlay::OverlayTemplate;
pub use tokens::{GenerateTokenRequest, GenerateTokenResponse, TokenCredentialsResponse};

use crate::tokens::TokenService;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub token_service: Arc<TokenService>,
    pub overlay_template: Arc<OverlayTemplate>,
}

/// Create the application router.
///
/// `static_dir`, when set, is served under `/static` (overlay script,
/// stylesheet, images). CORS is permissive on every route, static files
/// included: overlays are embedded by streaming software running on other
/// origins.
pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/api/generate-token", post(tokens::generate_token))
        .route("/api/token/:token_id", get(tokens::get_token))
        .route("/overlay/:token_id", get(overlay::render_overlay))
        .with_state(Arc::new(state));

    if let Some(dir) = static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    // Layer last so it wraps the nested service too
    router.layer(CorsLayer::permissive())
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for JSON endpoints
#[derive(Debug)]
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

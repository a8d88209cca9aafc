//! Token issuance and resolution endpoints.

use super::{AppError, AppState};
use crate::credentials::{CredentialError, CredentialPayload, CredentialSet};
use crate::tokens::ResolveError;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// Request body for POST /api/generate-token
#[derive(Deserialize)]
pub struct GenerateTokenRequest {
    #[serde(default)]
    pub credentials: Option<CredentialPayload>,
}

/// Response for POST /api/generate-token
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenResponse {
    pub success: bool,
    pub token_id: String,
    pub overlay_url: String,
}

/// Response for GET /api/token/:tokenId
#[derive(Serialize)]
pub struct TokenCredentialsResponse {
    pub success: bool,
    pub credentials: CredentialSet,
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound => AppError::NotFound("Token not found".to_string()),
            ResolveError::Expired => AppError::Unauthorized("Token expired".to_string()),
            ResolveError::DecryptFailure(_) => {
                AppError::ServerError("Failed to decrypt credentials".to_string())
            }
        }
    }
}

/// Relative overlay URL for a token
pub fn overlay_url(token_id: &str) -> String {
    format!("/overlay/{}", token_id)
}

/// POST /api/generate-token
///
/// Validates the submitted credentials, issues a token and returns the
/// overlay URL bound to it. Nothing is stored unless validation passes.
pub(super) async fn generate_token(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateTokenRequest>, JsonRejection>,
) -> Result<Json<GenerateTokenResponse>, AppError> {
    let Json(request) = body.map_err(|e| {
        warn!(error = %e, "Rejected malformed token request");
        AppError::BadRequest(CredentialError::MissingCredentials.to_string())
    })?;

    let credentials = request
        .credentials
        .ok_or(CredentialError::MissingCredentials)
        .and_then(CredentialPayload::validate)
        .map_err(|e| {
            warn!(error = %e, "Rejected token request");
            AppError::BadRequest(e.to_string())
        })?;

    let token_id = state.token_service.issue_now(&credentials).map_err(|e| {
        let cause = format!("{:#}", e);
        error!(error = %cause, "Token generation failed");
        AppError::ServerError("Failed to generate token".to_string())
    })?;

    Ok(Json(GenerateTokenResponse {
        success: true,
        overlay_url: overlay_url(&token_id),
        token_id,
    }))
}

/// GET /api/token/:tokenId
///
/// Hands the decrypted credentials to the overlay's poller.
/// 404 unknown, 401 expired, 500 undecryptable.
pub(super) async fn get_token(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<String>,
) -> Result<Response, AppError> {
    let credentials = state.token_service.resolve_now(&token_id)?;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(TokenCredentialsResponse {
            success: true,
            credentials,
        }),
    )
        .into_response())
}

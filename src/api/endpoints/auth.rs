//! `POST /api/v1/login`: exchange the shared service secret for a bearer token.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Some(secret) = ctx.config.shared_secret.as_deref() else {
        tracing::warn!("Login attempted but no shared secret is configured");
        return Err(ApiError::InvalidSecret);
    };
    if !bool::from(secret.as_bytes().ct_eq(request.api_key.as_bytes())) {
        tracing::warn!("Login rejected: invalid secret");
        return Err(ApiError::InvalidSecret);
    }

    let mut tokens = ctx
        .tokens
        .lock()
        .map_err(|_| ApiError::Internal("token store lock".into()))?;
    let access_token = tokens.issue(&ctx.config.identity);
    tracing::info!(identity = %ctx.config.identity, "Bearer token issued");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "bearer",
        expires_in: tokens.ttl().as_secs(),
    }))
}

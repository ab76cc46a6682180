//! Public routes
//!
//! - GET /handles/{id}        - current token behind a delegation handle
//! - GET /share-tokens/{token} - owner of a share token, as the issuer reports it
//! - GET /whoami              - identity of the request's bearer token

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use token_lifecycle::{HandleToken, Identity, ShareTokenInfo, identify};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/handles/{id}", get(resolve_handle))
        .route("/share-tokens/{token}", get(resolve_share_token))
        .route("/whoami", get(whoami))
}

/// Token from an `Authorization: Bearer ...` header.
pub(crate) fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

async fn resolve_handle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HandleToken>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("invalid handle id: {id}")))?;
    Ok(Json(state.manager.resolve_handle(&id).await?))
}

async fn resolve_share_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ShareTokenInfo>, ApiError> {
    Ok(Json(state.shares.resolve(&token).await?))
}

async fn whoami(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Identity>, ApiError> {
    let token = bearer(&headers).ok_or(ApiError::Unauthorized)?;
    let identity = identify(token, state.manager.validator(), &state.shares).await?;
    Ok(Json(identity))
}

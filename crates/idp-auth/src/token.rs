//! Token endpoint calls
//!
//! Two grants against the same endpoint:
//! 1. `authorization_code`, closing out a login flow
//! 2. `refresh_token`, renewing an access token without credentials

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::constants::IdentityEndpoints;
use crate::error::{Error, Result, truncate_body};

/// Response from the token endpoint for both grants.
///
/// The provider omits `refresh_token` on some refresh responses; callers keep
/// the previous one in that case.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute).
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchange an authorization code plus its PKCE verifier for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoints.token_url())
        .json(&json!({
            "redirect_uri": endpoints.redirect_uri,
            "grant_type": "authorization_code",
            "client_id": endpoints.client_id,
            "code": code,
            "code_verifier": verifier,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = truncate_body(response.text().await.unwrap_or_default());
        if status.as_u16() == 429 {
            return Err(Error::FlowBroken {
                step: "token",
                status: 429,
                detail: format!("rate limited: {body}"),
            });
        }
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Renew an access token with a refresh token.
///
/// 401/403 mean the refresh token is revoked or invalid and map to
/// `InvalidCredentials`; anything else non-2xx is a `TokenExchange` failure.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoints.token_url())
        .json(&json!({
            "redirect_uri": endpoints.redirect_uri,
            "grant_type": "refresh_token",
            "client_id": endpoints.client_id,
            "refresh_token": refresh,
        }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = truncate_body(response.text().await.unwrap_or_default());
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

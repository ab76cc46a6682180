//! Bearer identification
//!
//! A bearer is either a primary access token, checked locally by the
//! validator, or a delegated share token, resolved by the issuer.

use serde::Serialize;

use idp_auth::{SHARE_TOKEN_PREFIX, TokenValidator};

use crate::error::Result;
use crate::share::ShareTokenService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BearerKind {
    Primary,
    Delegated,
}

/// Who a bearer token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub account_id: String,
    pub email: String,
    pub expires_at: u64,
    pub kind: BearerKind,
}

pub async fn identify(
    bearer: &str,
    validator: &TokenValidator,
    shares: &ShareTokenService,
) -> Result<Identity> {
    let bearer = bearer.trim();
    if bearer.starts_with(SHARE_TOKEN_PREFIX) {
        let info = shares.resolve(bearer).await?;
        return Ok(Identity {
            account_id: info.owner_id,
            email: info.email,
            expires_at: info.expires_at,
            kind: BearerKind::Delegated,
        });
    }

    let claims = validator.validate(bearer)?;
    Ok(Identity {
        account_id: claims.account_id().to_owned(),
        email: claims.email().to_owned(),
        expires_at: claims.expiry(),
        kind: BearerKind::Primary,
    })
}

//! Error types for token lifecycle operations
//!
//! Narrower than `idp_auth::Error`: store lookups become `NotFound`, store I/O
//! becomes `Credential`, and exhausting both refresh and login becomes
//! `ReauthenticationFailed`. Everything else from the provider passes through.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Refresh and full login both failed; stored state was left as it was.
    #[error("re-authentication failed for {account_id}: {detail}")]
    ReauthenticationFailed { account_id: String, detail: String },

    #[error("token acquisition for {account_id} timed out after {after:?}")]
    Timeout { account_id: String, after: Duration },

    /// The share-token issuer answered outside its contract.
    #[error("share token issuer rejected request (HTTP {status}): {body}")]
    IssuerRejected { status: u16, body: String },

    /// The provider returned a valid token for a different account.
    #[error("token belongs to {actual}, expected {expected}")]
    AccountMismatch { expected: String, actual: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential store error: {0}")]
    Credential(String),

    #[error(transparent)]
    Auth(idp_auth::Error),
}

impl From<idp_auth::Error> for Error {
    fn from(e: idp_auth::Error) -> Self {
        match e {
            idp_auth::Error::NotFound(what) => Error::NotFound(what),
            idp_auth::Error::Io(detail) | idp_auth::Error::CredentialParse(detail) => {
                Error::Credential(detail)
            }
            other => Error::Auth(other),
        }
    }
}

impl Error {
    /// Stable category label for logs, metrics and API error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::ReauthenticationFailed { .. } => "reauthentication_failed",
            Error::Timeout { .. } => "timeout",
            Error::IssuerRejected { .. } => "issuer_rejected",
            Error::AccountMismatch { .. } => "account_mismatch",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Credential(_) => "storage",
            Error::Auth(e) => e.category(),
        }
    }
}

/// Result alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

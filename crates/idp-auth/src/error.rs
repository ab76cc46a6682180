//! Error types for identity provider operations
//!
//! Every failure the login flow, token exchange, token validation and the
//! credential store can produce. Provider response bodies are kept (bounded)
//! in the variants that carry them so operators can see what the provider
//! actually said.

/// Upper bound on provider response bodies stored in errors.
const MAX_BODY_CHARS: usize = 2048;

/// Errors from identity provider and credential operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure. The only transient category: callers may retry the
    /// whole operation.
    #[error("network failure: {0}")]
    Network(String),

    /// The provider answered outside the expected redirect/status shape.
    #[error("login flow broken at {step} (HTTP {status}): {detail}")]
    FlowBroken {
        step: &'static str,
        status: u16,
        detail: String,
    },

    #[error("identifier rejected (HTTP {status}): {body}")]
    IdentifierRejected { status: u16, body: String },

    #[error("authentication failed (HTTP {status}): {body}")]
    AuthenticationFailed { status: u16, body: String },

    #[error("provider requested an MFA code but none was supplied")]
    MfaRequired,

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Refresh token revoked or invalid (401/403 from the token endpoint).
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid token signature: {0}")]
    InvalidSignature(String),

    #[error("token expired")]
    Expired,

    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("token belongs to an unregistered account")]
    UnregisteredAccount,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether retrying the whole operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Whether this is one of the token validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature(_)
                | Error::Expired
                | Error::InsufficientScope(_)
                | Error::UnregisteredAccount
        )
    }

    /// Stable category label for logs, metrics and API error bodies.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Network(_) => "network_failure",
            Error::FlowBroken { .. } => "flow_broken",
            Error::IdentifierRejected { .. } => "identifier_rejected",
            Error::AuthenticationFailed { .. } | Error::MfaRequired => "authentication_failed",
            Error::TokenExchange(_) => "token_exchange",
            Error::InvalidCredentials(_) => "invalid_credentials",
            Error::InvalidSignature(_) => "invalid_signature",
            Error::Expired => "expired",
            Error::InsufficientScope(_) => "insufficient_scope",
            Error::UnregisteredAccount => "unregistered_account",
            Error::CredentialParse(_) | Error::Io(_) => "storage",
            Error::NotFound(_) => "not_found",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

/// Trim a provider response body to a size that is safe to keep in errors/logs.
pub fn truncate_body(body: String) -> String {
    if body.chars().count() <= MAX_BODY_CHARS {
        return body;
    }
    let mut truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

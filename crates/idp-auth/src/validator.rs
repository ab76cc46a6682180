//! Access-token validation
//!
//! Checks, in order: RS256 signature against the provider key (plus issuer
//! and audience), the validity window, the required scopes, and the presence
//! of the profile/auth claim blocks. Pure apart from reading the clock; no I/O.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

use crate::claims::Claims;
use crate::constants::{AUDIENCE, ISSUER, PUBLIC_KEY_PEM, USERINFO_AUDIENCE};
use crate::error::{Error, Result};

/// Verifies provider access tokens against one fixed public key.
///
/// Built once at startup and shared (`Arc<TokenValidator>`); validation
/// borrows it immutably so concurrent callers never contend.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    /// Validator for the production provider using the embedded key.
    pub fn embedded() -> Result<Self> {
        Self::new(PUBLIC_KEY_PEM.as_bytes())
    }

    /// Validator for the production issuer/audience with a caller-supplied key.
    pub fn new(public_key_pem: &[u8]) -> Result<Self> {
        Self::with_policy(public_key_pem, ISSUER, &[AUDIENCE, USERINFO_AUDIENCE])
    }

    /// Validator with an explicit issuer and accepted audiences.
    pub fn with_policy(public_key_pem: &[u8], issuer: &str, audiences: &[&str]) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| Error::CredentialParse(format!("invalid RSA public key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_issuer(&[issuer]);
        validation.set_audience(audiences);
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self { key, validation })
    }

    /// Validate a token string and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let data = decode::<serde_json::Value>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::Expired,
                ErrorKind::InvalidIssuer => Error::InvalidSignature("issuer mismatch".into()),
                ErrorKind::InvalidAudience => Error::InvalidSignature("audience mismatch".into()),
                _ => Error::InvalidSignature(e.to_string()),
            },
        )?;
        Claims::from_payload(&data.claims)
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("algorithms", &self.validation.algorithms)
            .field("issuer", &self.validation.iss)
            .finish()
    }
}

//! Typed access-token claims
//!
//! The provider's token payload is a loose JSON object with namespaced claim
//! blocks. `Claims::from_payload` does every presence/type check once, so the
//! rest of the gateway only sees named accessors.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::constants::{AUTH_CLAIM, PROFILE_CLAIM, REQUIRED_SCOPES};
use crate::error::{Error, Result};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// How an account signs in at the provider, derived from the `sub` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Username/password account (`auth0|...`). Can fall back to full login.
    Primary,
    /// Google sign-in (`google-oauth2|...`). Refresh token only.
    FederatedGoogle,
    /// Microsoft sign-in (`windowslive|...`). Refresh token only.
    FederatedMicrosoft,
}

impl ProviderKind {
    /// Classify by the part of `sub` before the first `|`.
    pub fn from_subject(subject: &str) -> Self {
        let prefix = subject.split('|').next().unwrap_or_default();
        match prefix {
            "auth0" => ProviderKind::Primary,
            "google-oauth2" => ProviderKind::FederatedGoogle,
            "windowslive" => ProviderKind::FederatedMicrosoft,
            other => {
                warn!(prefix = other, "unknown subject prefix, treating as primary");
                ProviderKind::Primary
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::FederatedGoogle => "google",
            ProviderKind::FederatedMicrosoft => "microsoft",
        }
    }

    /// Whether the provider accepts a password login for this kind.
    pub fn supports_password_login(&self) -> bool {
        matches!(self, ProviderKind::Primary)
    }
}

/// Validated claims of a primary access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    expires_at: u64,
    account_id: String,
    email: String,
    subject: String,
    scopes: Vec<String>,
}

impl Claims {
    /// Build claims from a signature-checked payload.
    ///
    /// Fails with `InsufficientScope` when `scope` lacks a required capability
    /// and with `UnregisteredAccount` when the profile/auth blocks are missing.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let scopes = parse_scopes(payload.get("scope"))
            .ok_or_else(|| Error::InsufficientScope("token has no scope claim".into()))?;
        let missing: Vec<&str> = REQUIRED_SCOPES
            .iter()
            .copied()
            .filter(|required| !scopes.iter().any(|s| s == required))
            .collect();
        if !missing.is_empty() {
            return Err(Error::InsufficientScope(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        let profile = payload.get(PROFILE_CLAIM).and_then(Value::as_object);
        let auth = payload.get(AUTH_CLAIM).and_then(Value::as_object);
        let (Some(profile), Some(auth)) = (profile, auth) else {
            return Err(Error::UnregisteredAccount);
        };
        let account_id = auth
            .get("user_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(Error::UnregisteredAccount)?;
        let email = profile
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let expires_at = payload
            .get("exp")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .ok_or_else(|| Error::InvalidSignature("token has no numeric exp claim".into()))?;

        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(Self {
            expires_at,
            account_id: account_id.to_owned(),
            email: email.to_owned(),
            subject: subject.to_owned(),
            scopes,
        })
    }

    /// `exp` claim, unix seconds.
    pub fn expiry(&self) -> u64 {
        self.expires_at
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::from_subject(&self.subject)
    }
}

/// Accept `scope` as a space-separated string or as an array of strings.
fn parse_scopes(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => Some(s.split_whitespace().map(str::to_owned).collect()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(scope: Value) -> Value {
        json!({
            "exp": 1_900_000_000u64,
            "sub": "auth0|abc123",
            "scope": scope,
            PROFILE_CLAIM: { "email": "ops@example.com", "email_verified": true },
            AUTH_CLAIM: { "user_id": "user-42" }
        })
    }

    #[test]
    fn accessors_expose_checked_fields() {
        let claims = Claims::from_payload(&payload(json!("openid model.read model.request"))).unwrap();
        assert_eq!(claims.expiry(), 1_900_000_000);
        assert_eq!(claims.account_id(), "user-42");
        assert_eq!(claims.email(), "ops@example.com");
        assert_eq!(claims.provider_kind(), ProviderKind::Primary);
        assert_eq!(claims.scopes().len(), 3);
    }

    #[test]
    fn scope_array_is_accepted() {
        let claims = Claims::from_payload(&payload(json!(["model.request", "model.read"]))).unwrap();
        assert_eq!(claims.scopes(), ["model.request", "model.read"]);
    }

    #[test]
    fn missing_request_scope_is_insufficient() {
        let err = Claims::from_payload(&payload(json!("openid model.read"))).unwrap_err();
        match err {
            Error::InsufficientScope(detail) => assert!(detail.contains("model.request")),
            other => panic!("expected InsufficientScope, got {other:?}"),
        }
    }

    #[test]
    fn missing_scope_claim_is_insufficient() {
        let mut p = payload(json!("model.read model.request"));
        p.as_object_mut().unwrap().remove("scope");
        assert!(matches!(
            Claims::from_payload(&p),
            Err(Error::InsufficientScope(_))
        ));
    }

    #[test]
    fn missing_auth_block_is_unregistered() {
        let mut p = payload(json!("model.read model.request"));
        p.as_object_mut().unwrap().remove(AUTH_CLAIM);
        assert!(matches!(
            Claims::from_payload(&p),
            Err(Error::UnregisteredAccount)
        ));
    }

    #[test]
    fn provider_kind_from_subject_prefix() {
        assert_eq!(ProviderKind::from_subject("auth0|x"), ProviderKind::Primary);
        assert_eq!(
            ProviderKind::from_subject("google-oauth2|1234"),
            ProviderKind::FederatedGoogle
        );
        assert_eq!(
            ProviderKind::from_subject("windowslive|abcd"),
            ProviderKind::FederatedMicrosoft
        );
        assert_eq!(ProviderKind::from_subject("apple|z"), ProviderKind::Primary);
        assert!(!ProviderKind::FederatedGoogle.supports_password_login());
    }
}

//! Test fixtures: a throwaway RSA keypair and helpers to mint provider-shaped
//! access tokens with it. Compiled for this crate's tests and, behind the
//! `test-util` feature, for downstream crates' tests.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

use crate::claims::unix_now;
use crate::constants::{AUDIENCE, AUTH_CLAIM, ISSUER, PROFILE_CLAIM, USERINFO_AUDIENCE};
use crate::validator::TokenValidator;

pub const TEST_PRIVATE_KEY_PEM: &str = include_str!("testing/test_private.pem");
pub const TEST_PUBLIC_KEY_PEM: &str = include_str!("testing/test_public.pem");

/// Validator that trusts the test keypair with the production issuer/audience.
pub fn validator() -> TokenValidator {
    TokenValidator::new(TEST_PUBLIC_KEY_PEM.as_bytes()).expect("test public key parses")
}

/// Shape of a minted token. `Default` is a valid primary-account token that
/// expires an hour from now.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub account_id: String,
    pub email: String,
    pub subject: String,
    pub scope: String,
    pub issuer: String,
    pub expires_at: u64,
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            account_id: "user-test".into(),
            email: "test@example.com".into(),
            subject: "auth0|test".into(),
            scope: "openid email profile model.read model.request offline_access".into(),
            issuer: ISSUER.into(),
            expires_at: unix_now() + 3600,
        }
    }
}

impl TokenSpec {
    pub fn for_account(account_id: &str, email: &str) -> Self {
        Self {
            account_id: account_id.into(),
            email: email.into(),
            ..Self::default()
        }
    }

    pub fn expiring_at(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }
}

/// Sign a token shaped like the provider's access tokens.
pub fn mint(spec: &TokenSpec) -> String {
    mint_payload(&json!({
        "iss": spec.issuer,
        "aud": [AUDIENCE, USERINFO_AUDIENCE],
        "sub": spec.subject,
        "iat": unix_now(),
        "exp": spec.expires_at,
        "scope": spec.scope,
        PROFILE_CLAIM: { "email": spec.email, "email_verified": true },
        AUTH_CLAIM: { "user_id": spec.account_id },
    }))
}

/// Sign an arbitrary payload with the test key.
pub fn mint_payload(payload: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(TEST_PRIVATE_KEY_PEM.as_bytes())
        .expect("test private key parses");
    encode(&Header::new(Algorithm::RS256), payload, &key).expect("test token encodes")
}

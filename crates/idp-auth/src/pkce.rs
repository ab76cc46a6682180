//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! Each login attempt generates its own verifier/challenge pair. The challenge
//! goes out with the authorize request; the verifier stays in the flow engine
//! and is sent with the code-for-token exchange at the end of the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::IdentityEndpoints;

/// Number of random bytes behind a verifier. 64 bytes encode to 86
/// base64url characters, inside the 43-128 range RFC 7636 allows.
const VERIFIER_BYTES: usize = 64;

/// A verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a fresh verifier and its challenge.
pub fn generate() -> PkcePair {
    let verifier = generate_verifier();
    let challenge = compute_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// URL-safe base64 without padding only uses the unreserved set
/// (`A-Z a-z 0-9 - _`).
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the authorize URL for one login attempt.
///
/// `prompt=login` forces the provider to run the credential steps even if it
/// still recognises a session.
pub fn build_authorization_url(endpoints: &IdentityEndpoints, challenge: &str) -> Url {
    let mut url = endpoints.authorize_url();
    url.query_pairs_mut()
        .append_pair("client_id", &endpoints.client_id)
        .append_pair("audience", &endpoints.audience)
        .append_pair("redirect_uri", &endpoints.redirect_uri)
        .append_pair("scope", &endpoints.scope)
        .append_pair("response_type", "code")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("prompt", "login");
    url
}

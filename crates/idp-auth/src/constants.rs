//! Identity provider constants
//!
//! Public client configuration of the provider's first-party mobile app. These
//! values are not secrets; they identify the public client and the token
//! policy. The actual secrets (passwords, refresh tokens) live in the
//! credential store.

use url::Url;

/// Production authorization server.
pub const AUTH_BASE: &str = "https://auth0.openai.com";

/// Public OAuth client ID of the mobile app whose login sequence we emulate.
pub const CLIENT_ID: &str = "pdlLIX2Y72MIl2rhLhTE9VV9bN905kBh";

/// Custom-scheme callback. Never fetched: the code is read off the redirect.
pub const REDIRECT_URI: &str = "com.openai.chat://auth0.openai.com/ios/com.openai.chat/callback";

/// Audience requested at authorize time and required on issued tokens.
pub const AUDIENCE: &str = "https://api.openai.com/v1";

/// Second audience the provider stamps on access tokens.
pub const USERINFO_AUDIENCE: &str = "https://openai.openai.auth0app.com/userinfo";

/// Issuer claim of access tokens.
pub const ISSUER: &str = "https://auth0.openai.com/";

/// Scopes requested during login. `offline_access` yields a refresh token.
pub const SCOPES: &str =
    "openid email profile offline_access model.request model.read organization.read";

/// Capability markers an access token must carry to be useful.
pub const REQUIRED_SCOPES: [&str; 2] = ["model.read", "model.request"];

/// Claim block holding profile data (`email`).
pub const PROFILE_CLAIM: &str = "https://api.openai.com/profile";

/// Claim block holding account linkage (`user_id`).
pub const AUTH_CLAIM: &str = "https://api.openai.com/auth";

/// Prefix of opaque delegated share tokens.
pub const SHARE_TOKEN_PREFIX: &str = "fk-";

/// Desktop browser identity sent with every form post.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

/// RS256 key the provider signs access tokens with.
pub const PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA27rOErDOPvPc3mOADYtQ
BeenQm5NS5VHVaoO/Zmgsf1M0Wa/2WgLm9jX65Ru/K8Az2f4MOdpBxxLL686ZS+K
7eJC/oOnrxCRzFYBqQbYo+JMeqNkrCn34yed4XkX4ttoHi7MwCEpVfb05Qf/ZAmN
I1XjecFYTyZQFrd9LjkX6lr05zY6aM/+MCBNeBWp35pLLKhiq9AieB1wbDPcGnqx
lXuU/bLgIyqUltqLkr9JHsf/2T4VrXXNyNeQyBq5wjYlRkpBQDDDNOcdGpx1buRr
Z2hFyYuXDRrMcR6BQGC0ur9hI5obRYlchDFhlb0ElsJ2bshDDGRk5k3doHqbhj2I
gQIDAQAB
-----END PUBLIC KEY-----
";

/// Endpoints and client parameters for one identity provider deployment.
///
/// Production uses [`IdentityEndpoints::default`]; tests point `base` at a
/// local mock server. Every endpoint URL is derived from `base`, so the flow
/// engine never concatenates provider paths itself.
#[derive(Debug, Clone)]
pub struct IdentityEndpoints {
    pub base: Url,
    pub client_id: String,
    pub redirect_uri: String,
    pub audience: String,
    pub scope: String,
}

impl IdentityEndpoints {
    /// Endpoints for a provider served at `base`, with the production client.
    pub fn with_base(base: Url) -> Self {
        Self {
            base,
            client_id: CLIENT_ID.to_owned(),
            redirect_uri: REDIRECT_URI.to_owned(),
            audience: AUDIENCE.to_owned(),
            scope: SCOPES.to_owned(),
        }
    }

    pub fn authorize_url(&self) -> Url {
        self.join("/authorize")
    }

    pub fn identifier_url(&self, state: &str) -> Url {
        self.with_state("/u/login/identifier", state)
    }

    pub fn password_url(&self, state: &str) -> Url {
        self.with_state("/u/login/password", state)
    }

    pub fn mfa_challenge_url(&self, state: &str) -> Url {
        self.with_state("/u/mfa-otp-challenge", state)
    }

    pub fn token_url(&self) -> Url {
        self.join("/oauth/token")
    }

    /// Resolve a redirect `Location` (usually server-relative) against `base`.
    pub fn resolve(&self, location: &str) -> Option<Url> {
        self.base.join(location).ok()
    }

    fn join(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_path(path);
        url.set_query(None);
        url
    }

    fn with_state(&self, path: &str, state: &str) -> Url {
        let mut url = self.join(path);
        url.query_pairs_mut().append_pair("state", state);
        url
    }
}

impl Default for IdentityEndpoints {
    fn default() -> Self {
        Self::with_base(Url::parse(AUTH_BASE).expect("AUTH_BASE is a valid URL"))
    }
}

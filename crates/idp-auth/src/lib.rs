//! Identity provider authentication library
//!
//! Everything that talks to, or reasons about, the upstream identity
//! provider: PKCE, access-token validation, the browser-less login flow,
//! code/refresh token exchange, and the durable credential store. The crate
//! has no dependency on the gateway binary and is tested on its own against
//! local mock providers.
//!
//! Credential flow:
//! 1. `login::login()` runs authorize, identifier, password, resume, exchange
//! 2. `validator::TokenValidator::validate()` checks the resulting token
//! 3. `credentials::CredentialStore::upsert()` persists the account
//! 4. `token::refresh_token()` renews it later
//! 5. `credentials::CredentialStore::update_tokens()` stores the rotation

pub mod claims;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod login;
pub mod pkce;
pub mod redirect;
pub mod token;
pub mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use claims::{Claims, ProviderKind, unix_now};
pub use constants::*;
pub use credentials::{
    Account, CredentialStore, DelegatedShareToken, DelegationHandle, LoginSecret, TokenState,
    Upsert,
};
pub use error::{Error, Result, truncate_body};
pub use login::{LoginRequest, login};
pub use pkce::{PkcePair, build_authorization_url, compute_challenge, generate_verifier};
pub use token::{TokenResponse, exchange_code, refresh_token};
pub use validator::TokenValidator;

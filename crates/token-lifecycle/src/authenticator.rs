//! Provider seam for the lifecycle manager
//!
//! The manager only needs "log in" and "refresh". `HttpAuthenticator` does
//! both against the real provider; tests substitute counting fakes.

use std::future::Future;
use std::pin::Pin;

use idp_auth::{IdentityEndpoints, LoginRequest, TokenResponse};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Obtains fresh provider tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types so the manager can hold an
/// `Arc<dyn Authenticator>`.
pub trait Authenticator: Send + Sync {
    /// Full login flow with username and password.
    fn login<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, idp_auth::Result<TokenResponse>>;

    /// Refresh-token grant.
    fn refresh<'a>(&'a self, refresh_token: &'a str)
    -> BoxFuture<'a, idp_auth::Result<TokenResponse>>;
}

/// Authenticator backed by the provider's HTTP endpoints.
///
/// Refreshes share one pooled client. Logins build their own client per
/// attempt inside `idp_auth::login`, so cookie jars are never shared.
pub struct HttpAuthenticator {
    endpoints: IdentityEndpoints,
    client: reqwest::Client,
}

impl HttpAuthenticator {
    pub fn new(endpoints: IdentityEndpoints) -> idp_auth::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(idp_auth::USER_AGENT)
            .build()?;
        Ok(Self { endpoints, client })
    }

    pub fn endpoints(&self) -> &IdentityEndpoints {
        &self.endpoints
    }
}

impl Authenticator for HttpAuthenticator {
    fn login<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, idp_auth::Result<TokenResponse>> {
        Box::pin(idp_auth::login(
            &self.endpoints,
            LoginRequest {
                username,
                password,
                mfa_code: None,
            },
        ))
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, idp_auth::Result<TokenResponse>> {
        Box::pin(idp_auth::refresh_token(
            &self.client,
            &self.endpoints,
            refresh_token,
        ))
    }
}

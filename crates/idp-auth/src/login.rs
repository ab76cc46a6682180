//! Browser-less login flow
//!
//! Drives the provider's universal-login pages with plain HTTP:
//! authorize, identifier, password, resume (with an optional OTP challenge),
//! then the code-for-token exchange. Flow state travels in session cookies
//! plus the `state` query parameter, so every attempt gets its own client and
//! cookie jar which are dropped when the attempt ends.

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::{debug, info, warn};

use crate::constants::{IdentityEndpoints, USER_AGENT};
use crate::error::{Error, Result, truncate_body};
use crate::pkce;
use crate::redirect::{self, Callback, ResumeTarget};
use crate::token::{self, TokenResponse};

/// Resume hops tolerated before the flow is considered broken.
const MAX_RESUME_HOPS: usize = 4;

/// Credentials for one login attempt.
#[derive(Clone, Copy)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub mfa_code: Option<&'a str>,
}

impl std::fmt::Debug for LoginRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("mfa_code", &self.mfa_code.map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Run one complete login attempt.
///
/// Network errors abort immediately; retrying is the caller's decision.
pub async fn login(endpoints: &IdentityEndpoints, request: LoginRequest<'_>) -> Result<TokenResponse> {
    let client = flow_client()?;
    let pkce = pkce::generate();
    debug!(username = request.username, "starting login flow");

    let state = authorize(&client, endpoints, &pkce.challenge).await?;
    submit_identifier(&client, endpoints, &state, request.username).await?;
    let resume = submit_password(&client, endpoints, &state, request).await?;

    match follow_resume(&client, endpoints, &resume, request.mfa_code).await? {
        Callback::Code(code) => {
            let tokens = token::exchange_code(&client, endpoints, &code, &pkce.verifier).await?;
            info!(username = request.username, "login flow completed");
            Ok(tokens)
        }
        Callback::AccessToken(access_token) => {
            info!(username = request.username, "login flow returned token directly");
            Ok(TokenResponse {
                access_token,
                refresh_token: None,
                expires_in: None,
            })
        }
        Callback::Error { error, description } => {
            warn!(username = request.username, error = %error, "provider rejected login at callback");
            Err(Error::AuthenticationFailed {
                status: 302,
                body: match description {
                    Some(description) => format!("{error}: {description}"),
                    None => error,
                },
            })
        }
    }
}

/// Client scoped to a single attempt: own cookie jar, redirects surfaced.
fn flow_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .redirect(Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .map_err(Error::from)
}

async fn authorize(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    challenge: &str,
) -> Result<String> {
    let url = pkce::build_authorization_url(endpoints, challenge);
    let response = client.get(url).send().await?;
    let location = expect_redirect(response, "authorize").await?;
    redirect::extract_state(endpoints, &location).ok_or_else(|| Error::FlowBroken {
        step: "authorize",
        status: 302,
        detail: format!("redirect carried no state: {location}"),
    })
}

async fn submit_identifier(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    state: &str,
    username: &str,
) -> Result<()> {
    let response = client
        .post(endpoints.identifier_url(state))
        .form(&[
            ("state", state),
            ("username", username),
            ("js-available", "true"),
            ("webauthn-available", "true"),
            ("is-brave", "false"),
            ("webauthn-platform-available", "false"),
            ("action", "default"),
        ])
        .send()
        .await?;

    let status = response.status();
    if status.is_redirection() {
        return Ok(());
    }
    let body = truncate_body(response.text().await.unwrap_or_default());
    warn!(status = status.as_u16(), "identifier submission rejected");
    Err(Error::IdentifierRejected {
        status: status.as_u16(),
        body,
    })
}

/// Returns the resume location the provider redirects to.
async fn submit_password(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    state: &str,
    request: LoginRequest<'_>,
) -> Result<String> {
    let response = client
        .post(endpoints.password_url(state))
        .form(&[
            ("state", state),
            ("username", request.username),
            ("password", request.password),
            ("action", "default"),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_redirection() {
        let body = truncate_body(response.text().await.unwrap_or_default());
        warn!(status = status.as_u16(), "password submission rejected");
        return Err(Error::AuthenticationFailed {
            status: status.as_u16(),
            body,
        });
    }
    location_of(&response).ok_or_else(|| Error::FlowBroken {
        step: "password",
        status: status.as_u16(),
        detail: "redirect without Location".into(),
    })
}

/// Walk resume redirects until the app callback, answering at most one OTP
/// challenge on the way.
async fn follow_resume(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    location: &str,
    mfa_code: Option<&str>,
) -> Result<Callback> {
    let mut next = endpoints.resolve(location).ok_or_else(|| Error::FlowBroken {
        step: "resume",
        status: 302,
        detail: format!("unparsable resume location: {location}"),
    })?;
    let mut mfa_answered = false;

    for _ in 0..MAX_RESUME_HOPS {
        let response = client.get(next.clone()).send().await?;
        let mut location = expect_redirect(response, "resume").await?;

        if let Some(ResumeTarget::MfaChallenge { state }) =
            redirect::classify_resume(endpoints, &location)
        {
            let Some(code) = mfa_code else {
                return Err(Error::MfaRequired);
            };
            if mfa_answered {
                return Err(Error::AuthenticationFailed {
                    status: 302,
                    body: "MFA code was not accepted".into(),
                });
            }
            mfa_answered = true;
            location = submit_mfa(client, endpoints, &state, code).await?;
        }

        match redirect::classify_resume(endpoints, &location) {
            Some(ResumeTarget::Callback(callback)) => return Ok(callback),
            Some(ResumeTarget::Provider(url)) => next = url,
            Some(ResumeTarget::MfaChallenge { .. }) => {
                return Err(Error::AuthenticationFailed {
                    status: 302,
                    body: "MFA code was not accepted".into(),
                });
            }
            None => {
                return Err(Error::FlowBroken {
                    step: "resume",
                    status: 302,
                    detail: format!("unexpected location: {location}"),
                });
            }
        }
    }

    Err(Error::FlowBroken {
        step: "resume",
        status: 302,
        detail: format!("no callback after {MAX_RESUME_HOPS} redirects"),
    })
}

async fn submit_mfa(
    client: &reqwest::Client,
    endpoints: &IdentityEndpoints,
    state: &str,
    code: &str,
) -> Result<String> {
    let response = client
        .post(endpoints.mfa_challenge_url(state))
        .form(&[("state", state), ("code", code), ("action", "default")])
        .send()
        .await?;

    let status = response.status();
    if !status.is_redirection() {
        let body = truncate_body(response.text().await.unwrap_or_default());
        return Err(Error::AuthenticationFailed {
            status: status.as_u16(),
            body,
        });
    }
    location_of(&response).ok_or_else(|| Error::FlowBroken {
        step: "mfa",
        status: status.as_u16(),
        detail: "redirect without Location".into(),
    })
}

/// Require a redirect with a `Location`; anything else breaks the flow at `step`.
async fn expect_redirect(response: reqwest::Response, step: &'static str) -> Result<String> {
    let status = response.status();
    if status.is_redirection()
        && let Some(location) = location_of(&response)
    {
        return Ok(location);
    }
    let body = truncate_body(response.text().await.unwrap_or_default());
    let detail = if status.as_u16() == 429 {
        format!("rate limited: {body}")
    } else {
        body
    };
    warn!(step, status = status.as_u16(), "unexpected provider response");
    Err(Error::FlowBroken {
        step,
        status: status.as_u16(),
        detail,
    })
}

fn location_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(LOCATION)?
        .to_str()
        .ok()
        .map(str::to_owned)
}

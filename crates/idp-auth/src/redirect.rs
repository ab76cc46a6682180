//! Redirect `Location` parsing
//!
//! All knowledge of the provider's redirect URL shapes lives here. The flow
//! engine only asks "what is the state", "is this the MFA page", and "what did
//! the callback carry".

use url::Url;

use crate::constants::IdentityEndpoints;

/// What the terminal redirect to the app's callback URI carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Authorization code to exchange at the token endpoint.
    Code(String),
    /// Implicit-style token handed back directly.
    AccessToken(String),
    /// Provider-reported failure.
    Error {
        error: String,
        description: Option<String>,
    },
}

/// Where the provider sends the browser after the resume hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeTarget {
    /// OTP challenge page; carries the flow state to post the code with.
    MfaChallenge { state: String },
    /// Final redirect to the app callback.
    Callback(Callback),
    /// Another provider page (typically another resume hop).
    Provider(Url),
}

/// Pull the `state` parameter out of a redirect location.
///
/// Locations are usually server-relative (`/u/login/identifier?state=...`),
/// so they are resolved against the provider base first.
pub fn extract_state(endpoints: &IdentityEndpoints, location: &str) -> Option<String> {
    let url = endpoints.resolve(location)?;
    query_value(&url, "state").filter(|s| !s.is_empty())
}

/// Classify the location returned by a resume GET or MFA POST.
pub fn classify_resume(endpoints: &IdentityEndpoints, location: &str) -> Option<ResumeTarget> {
    if location.starts_with(&endpoints.redirect_uri) {
        return parse_callback(location).map(ResumeTarget::Callback);
    }
    let url = endpoints.resolve(location)?;
    if url.path().starts_with("/u/mfa-otp-challenge") {
        let state = query_value(&url, "state")?;
        return Some(ResumeTarget::MfaChallenge { state });
    }
    Some(ResumeTarget::Provider(url))
}

/// Parse the callback location without fetching it.
///
/// The callback uses the app's custom scheme, which `url` parses fine but no
/// HTTP client could follow. Values may sit in the query or in the fragment.
pub fn parse_callback(location: &str) -> Option<Callback> {
    let url = Url::parse(location).ok()?;
    let lookup = |key: &str| {
        query_value(&url, key).or_else(|| {
            url.fragment().and_then(|fragment| {
                url::form_urlencoded::parse(fragment.as_bytes())
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.into_owned())
            })
        })
    };

    if let Some(error) = lookup("error") {
        return Some(Callback::Error {
            error,
            description: lookup("error_description"),
        });
    }
    if let Some(code) = lookup("code").filter(|c| !c.is_empty()) {
        return Some(Callback::Code(code));
    }
    lookup("access_token")
        .filter(|t| !t.is_empty())
        .map(Callback::AccessToken)
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

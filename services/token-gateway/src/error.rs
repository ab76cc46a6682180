//! HTTP error mapping
//!
//! Every handler failure becomes `{"error": {"type": <category>, "message": <detail>}}`
//! with a status chosen from the lifecycle error category.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Lifecycle(#[from] token_lifecycle::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use token_lifecycle::Error as L;
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Lifecycle(e) => match e {
                L::NotFound(_) => StatusCode::NOT_FOUND,
                L::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                L::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                L::ReauthenticationFailed { .. }
                | L::IssuerRejected { .. }
                | L::AccountMismatch { .. } => StatusCode::BAD_GATEWAY,
                L::Credential(_) => StatusCode::INTERNAL_SERVER_ERROR,
                L::Auth(auth) => match auth {
                    _ if auth.is_validation() => StatusCode::UNAUTHORIZED,
                    idp_auth::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    idp_auth::Error::Io(_) | idp_auth::Error::CredentialParse(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::BAD_GATEWAY,
                },
            },
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ApiError::Lifecycle(e) => e.category(),
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Unauthorized => "unauthorized",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": {
                "type": self.category(),
                "message": self.to_string(),
            }
        });
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

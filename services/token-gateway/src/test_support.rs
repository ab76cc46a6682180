//! Shared fixtures for router tests: one mock server playing both the
//! identity provider token endpoint and the share-token issuer.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Form, Path};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use idp_auth::testing::{self, TokenSpec};
use idp_auth::{
    Account, CredentialStore, IdentityEndpoints, LoginSecret, ProviderKind, TokenState,
    unix_now,
};
use std::collections::HashMap;
use token_lifecycle::{HttpAuthenticator, ShareTokenService, TokenManager};
use url::Url;

use crate::AppState;

pub(crate) const ADMIN_TOKEN: &str = "admin-secret";

/// Refresh token the mock provider rejects with 401.
pub(crate) const REVOKED_REFRESH: &str = "rt_revoked";

async fn token_endpoint(axum::Json(body): axum::Json<serde_json::Value>) -> Response {
    if body["refresh_token"] == REVOKED_REFRESH {
        return (StatusCode::UNAUTHORIZED, r#"{"error":"invalid_grant"}"#).into_response();
    }
    axum::Json(serde_json::json!({
        "access_token": testing::mint(&TokenSpec::for_account("acct-1", "ops@example.com")),
        "refresh_token": "rt_next",
        "expires_in": 3600
    }))
    .into_response()
}

async fn register(Form(form): Form<HashMap<String, String>>) -> Response {
    axum::Json(serde_json::json!({
        "token_key": "fk-abc",
        "unique_name": form.get("unique_name").cloned().unwrap_or_default(),
        "expire_at": 1_700_000_000u64
    }))
    .into_response()
}

async fn info(Path(token): Path<String>) -> Response {
    if token != "fk-abc" {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    axum::Json(serde_json::json!({
        "user_id": "acct-1",
        "email": "ops@example.com",
        "expire_at": 1_700_000_000u64
    }))
    .into_response()
}

/// Start the mock provider/issuer and return its base URL.
pub(crate) async fn start_mock_upstream() -> Url {
    let app = Router::new()
        .route("/oauth/token", post(token_endpoint))
        .route("/token/register", post(register))
        .route("/token/info/{token}", get(info));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// Build application state over a fresh store in `dir`, talking to `upstream`.
pub(crate) async fn test_state(
    dir: &tempfile::TempDir,
    upstream: &Url,
    admin_token: Option<&str>,
) -> AppState {
    let store = CredentialStore::load(dir.path().join("store.json"))
        .await
        .unwrap();
    let authenticator =
        HttpAuthenticator::new(IdentityEndpoints::with_base(upstream.clone())).unwrap();
    let manager = Arc::new(TokenManager::new(
        Arc::new(store),
        Arc::new(testing::validator()),
        Arc::new(authenticator),
    ));
    let shares = Arc::new(ShareTokenService::new(manager.clone(), upstream.clone()).unwrap());

    AppState {
        manager,
        shares,
        admin_token: admin_token.map(Secret::from),
        public_base_url: Some(Url::parse("https://gw.example.com").unwrap()),
        prometheus: metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle(),
        started_at: Instant::now(),
    }
}

/// Store an account holding a valid, correctly signed token.
pub(crate) async fn seed_account(state: &AppState, id: &str) -> String {
    let spec = TokenSpec::for_account(id, &format!("{id}@example.com"));
    let access = testing::mint(&spec);
    state
        .manager
        .store()
        .upsert(Account {
            id: id.into(),
            email: format!("{id}@example.com"),
            login: LoginSecret::RefreshToken {
                refresh_token: format!("rt_{id}").into(),
            },
            provider: ProviderKind::Primary,
            tokens: Some(TokenState {
                access: access.clone(),
                refresh: Some(format!("rt_{id}").into()),
                expires_at: spec.expires_at,
            }),
            comment: String::new(),
            created_at: unix_now(),
        })
        .await
        .unwrap();
    access
}

pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

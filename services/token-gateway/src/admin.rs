//! Admin API for account, handle and share-token management
//!
//! All routes require `Authorization: Bearer <admin token>` when an admin
//! token is configured.
//!
//! Endpoints:
//! - GET    /admin/accounts              - list accounts (never exposes tokens)
//! - POST   /admin/accounts              - enroll by password or refresh token
//! - DELETE /admin/accounts/{id}         - remove account, its handles and share tokens
//! - POST   /admin/accounts/{id}/token   - valid access token, renewed if needed
//! - POST   /admin/refresh               - renew every expired account now
//! - GET    /admin/handles               - delegation handles with links
//! - GET    /admin/share-tokens          - stored share tokens
//! - POST   /admin/share-tokens          - issue a share token
//! - POST   /admin/share-tokens/reissue  - re-issue stale share tokens now

use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use common::Secret;
use serde::Deserialize;
use token_lifecycle::{IssueRequest, NewAccount};
use tracing::info;
use url::Url;
use uuid::Uuid;

use crate::AppState;
use crate::api::bearer;
use crate::error::ApiError;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/accounts", get(list_accounts).post(add_account))
        .route("/admin/accounts/{id}", delete(remove_account))
        .route("/admin/accounts/{id}/token", post(account_token))
        .route("/admin/refresh", post(refresh_all))
        .route("/admin/handles", get(list_handles))
        .route(
            "/admin/share-tokens",
            get(list_share_tokens).post(issue_share_token),
        )
        .route("/admin/share-tokens/reissue", post(reissue_share_tokens))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.admin_token
        && bearer(request.headers()) != Some(expected.expose().as_str())
    {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Enrollment body. Not `Debug`: it carries secrets.
#[derive(Deserialize)]
struct AddAccountRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    comment: String,
}

#[derive(Deserialize)]
struct IssueShareTokenRequest {
    account_id: String,
    display_name: String,
    #[serde(default)]
    site_limit: String,
    /// Zero means "as long as the primary token".
    #[serde(default)]
    ttl_secs: u64,
    #[serde(default)]
    comment: String,
}

async fn list_accounts(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "accounts": state.manager.list_accounts().await }))
}

async fn add_account(
    State(state): State<AppState>,
    Json(body): Json<AddAccountRequest>,
) -> Result<Response, ApiError> {
    let added = state
        .manager
        .add_account(NewAccount {
            email: body.email,
            password: body.password.map(Secret::from),
            refresh_token: body.refresh_token.map(Secret::from),
            comment: body.comment,
        })
        .await?;
    let status = if added.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(added)).into_response())
}

async fn remove_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.manager.remove_account(&id).await?;
    Ok(Json(serde_json::json!({
        "account_id": removed.id,
        "status": "removed"
    })))
}

async fn account_token(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = state.manager.ensure_valid_token(&id).await?;
    Ok(Json(serde_json::json!({
        "account_id": id,
        "access_token": access_token
    })))
}

async fn refresh_all(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.refresh_all_expired().await)
}

fn handle_link(base: &Url, id: &Uuid) -> Option<Url> {
    let mut url = base.clone();
    let id = id.to_string();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["auth", "login_auto", id.as_str()]);
    Some(url)
}

async fn list_handles(State(state): State<AppState>) -> impl IntoResponse {
    let handles: Vec<serde_json::Value> = state
        .manager
        .list_handles()
        .await
        .into_iter()
        .map(|h| {
            let link = state
                .public_base_url
                .as_ref()
                .and_then(|base| handle_link(base, &h.id))
                .map(|url| url.to_string());
            serde_json::json!({
                "id": h.id,
                "account_id": h.account_id,
                "comment": h.comment,
                "created_at": h.created_at,
                "link": link,
            })
        })
        .collect();
    Json(serde_json::json!({ "handles": handles }))
}

async fn list_share_tokens(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "share_tokens": state.shares.list().await }))
}

async fn issue_share_token(
    State(state): State<AppState>,
    Json(body): Json<IssueShareTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .shares
        .issue(IssueRequest {
            account_id: body.account_id,
            display_name: body.display_name,
            site_limit: body.site_limit,
            ttl: Duration::from_secs(body.ttl_secs),
            comment: body.comment,
        })
        .await?;
    info!(account_id = %issued.account_id, "share token issued via admin API");
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn reissue_share_tokens(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.shares.reissue_all_stale().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ADMIN_TOKEN, REVOKED_REFRESH, body_json, seed_account, start_mock_upstream, test_state,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        routes(state.clone()).with_state(state)
    }

    fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {ADMIN_TOKEN}"));
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn admin_token_is_required_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        let app = app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/accounts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/accounts")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(admin_request("GET", "/admin/accounts", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_open_without_configured_token() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, None).await;

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/admin/accounts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["accounts"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn enroll_by_refresh_token_then_list_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        let app = app(state);

        let body = serde_json::json!({ "refresh_token": "rt_enroll", "comment": "team" });
        let response = app
            .clone()
            .oneshot(admin_request("POST", "/admin/accounts", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["account"]["id"], "acct-1");
        assert_eq!(json["account"]["email"], "ops@example.com");
        assert_eq!(json["account"]["provider"], "primary");
        assert_eq!(json["created"], true);

        let response = app
            .clone()
            .oneshot(admin_request("POST", "/admin/accounts", Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "re-enrolling is not a create");

        let response = app
            .oneshot(admin_request("GET", "/admin/accounts", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        let accounts = json["accounts"].as_array().unwrap();
        assert_eq!(accounts.len(), 1);
        let text = json.to_string();
        assert!(!text.contains("rt_enroll"));
        assert!(!text.contains("rt_next"));
    }

    #[tokio::test]
    async fn enroll_with_revoked_refresh_token_is_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;

        let response = app(state)
            .oneshot(admin_request(
                "POST",
                "/admin/accounts",
                Some(serde_json::json!({ "refresh_token": REVOKED_REFRESH })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await["error"]["type"],
            "invalid_credentials"
        );
    }

    #[tokio::test]
    async fn enroll_without_secret_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;

        let response = app(state)
            .oneshot(admin_request(
                "POST",
                "/admin/accounts",
                Some(serde_json::json!({ "email": "ops@example.com" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn account_token_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        let access = seed_account(&state, "acct-2").await;
        let app = app(state);

        let response = app
            .clone()
            .oneshot(admin_request("POST", "/admin/accounts/acct-2/token", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["access_token"], access);

        let response = app
            .clone()
            .oneshot(admin_request("DELETE", "/admin/accounts/acct-2", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "removed");

        let response = app
            .oneshot(admin_request("POST", "/admin/accounts/acct-2/token", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn handles_are_listed_with_links() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        seed_account(&state, "acct-3").await;
        let handle = state.manager.create_handle("acct-3", "shared").await.unwrap();

        let response = app(state)
            .oneshot(admin_request("GET", "/admin/handles", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        let handles = json["handles"].as_array().unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0]["account_id"], "acct-3");
        assert_eq!(
            handles[0]["link"],
            format!("https://gw.example.com/auth/login_auto/{}", handle.id)
        );
    }

    #[tokio::test]
    async fn share_token_issue_list_and_reissue() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        seed_account(&state, "acct-1").await;
        let app = app(state);

        let response = app
            .clone()
            .oneshot(admin_request(
                "POST",
                "/admin/share-tokens",
                Some(serde_json::json!({
                    "account_id": "acct-1",
                    "display_name": "demo",
                    "ttl_secs": 3600,
                    "comment": "x"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["token"], "fk-abc");
        assert_eq!(json["expires_at"], 1_700_000_000u64);

        let response = app
            .clone()
            .oneshot(admin_request("GET", "/admin/share-tokens", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["share_tokens"].as_array().unwrap().len(), 1);

        // The issuer's expiry is in the past, so the token counts as stale.
        let response = app
            .oneshot(admin_request("POST", "/admin/share-tokens/reissue", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["reissued"].as_array().unwrap().len(), 1);
        assert_eq!(json["failures"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn refresh_endpoint_reports_pass() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        seed_account(&state, "acct-4").await;

        let response = app(state)
            .oneshot(admin_request("POST", "/admin/refresh", None))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["refreshed"], serde_json::json!([]));
    }

    #[test]
    fn handle_link_keeps_base_path() {
        let id = Uuid::nil();
        let base = Url::parse("https://gw.example.com/prefix/").unwrap();
        assert_eq!(
            handle_link(&base, &id).unwrap().as_str(),
            "https://gw.example.com/prefix/auth/login_auto/00000000-0000-0000-0000-000000000000"
        );
        assert!(handle_link(&Url::parse("mailto:ops@example.com").unwrap(), &id).is_none());
    }
}

//! Token Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads enrolled provider accounts from the credential store
//! 2. Serves valid access tokens for them, renewing on demand
//! 3. Renews expired tokens and stale share tokens in the background
//! 4. Exposes an admin API for accounts, handles and share tokens
//!
//! `--import <file>` enrolls accounts from a file and exits without serving.

mod admin;
mod api;
mod config;
mod error;
mod import;
mod metrics;
#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use common::Secret;
use idp_auth::{CredentialStore, IdentityEndpoints, TokenValidator};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use token_lifecycle::{HttpAuthenticator, ShareTokenService, TokenManager, spawn_refresh_task};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::config::Config;

/// Upper bound on draining in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub(crate) struct AppState {
    manager: Arc<TokenManager>,
    shares: Arc<ShareTokenService>,
    admin_token: Option<Secret<String>>,
    public_base_url: Option<Url>,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api::routes())
        .merge(admin::routes(state.clone()))
        .route_layer(axum::middleware::from_fn(metrics::track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Value following `flag` on the command line.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Wire the store, validator and provider client into a manager.
async fn build_manager(config: &Config) -> Result<Arc<TokenManager>> {
    let store = CredentialStore::load(config.store.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credential store from {}",
                config.store.path.display()
            )
        })?;

    let validator = match &config.identity.public_key_file {
        Some(path) => {
            let pem = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read public key {}", path.display()))?;
            TokenValidator::new(&pem).context("invalid identity provider public key")?
        }
        None => TokenValidator::embedded().context("embedded provider key is invalid")?,
    };

    let authenticator =
        HttpAuthenticator::new(IdentityEndpoints::with_base(config.identity.auth_base.clone()))
            .context("failed to build identity provider client")?;

    Ok(Arc::new(
        TokenManager::new(Arc::new(store), Arc::new(validator), Arc::new(authenticator))
            .with_timeout(Duration::from_secs(config.identity.login_timeout_secs)),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting token-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let config_path = Config::resolve_path(flag_value(&args, "--config"));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        store = %config.store.path.display(),
        auth_base = %config.identity.auth_base,
        issuer_base = %config.share.issuer_base,
        admin_auth = config.server.admin_token.is_some(),
        "configuration loaded"
    );

    let manager = build_manager(&config).await?;
    let shares = Arc::new(
        ShareTokenService::new(manager.clone(), config.share.issuer_base.clone())
            .context("failed to build share-token issuer client")?
            .with_timeout(Duration::from_secs(config.share.timeout_secs)),
    );

    if let Some(path) = flag_value(&args, "--import") {
        let summary = import::import_accounts(&manager, Path::new(path)).await?;
        info!(
            added = summary.added,
            existing = summary.existing,
            failed = summary.failed,
            "import complete"
        );
        return Ok(());
    }

    let refresh_task = spawn_refresh_task(
        manager.clone(),
        shares.clone(),
        Duration::from_secs(config.refresh.interval_secs),
    );

    let app_state = AppState {
        manager,
        shares,
        admin_token: config.server.admin_token.clone(),
        public_base_url: config.server.public_base_url.clone(),
        prometheus: prometheus_handle,
        started_at: Instant::now(),
    };
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    refresh_task.abort();
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: 200 when the store directory is reachable, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let accounts = state.manager.store().len().await;
    let store_dir = state
        .manager
        .store()
        .path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty());
    let reachable = match store_dir {
        Some(dir) => tokio::fs::try_exists(dir).await.unwrap_or(false),
        None => true,
    };

    let (status_code, status) = if reachable {
        (axum::http::StatusCode::OK, "healthy")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": status,
            "store": if reachable { "reachable" } else { "unreachable" },
            "accounts": accounts,
            "uptime_seconds": uptime,
        })
        .to_string(),
    )
}

/// Prometheus metrics endpoint - returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ADMIN_TOKEN, body_json, seed_account, start_mock_upstream, test_state,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn flag_values_are_read() {
        let args: Vec<String> = ["token-gateway", "--config", "/etc/gw.toml", "--import"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(flag_value(&args, "--config"), Some("/etc/gw.toml"));
        assert_eq!(flag_value(&args, "--import"), None, "flag without a value");
        assert_eq!(flag_value(&args, "--missing"), None);
    }

    #[tokio::test]
    async fn health_reports_accounts_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        seed_account(&state, "acct-1").await;

        let app = build_router(state, 16);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["store"], "reachable");
        assert_eq!(json["accounts"], 1);
    }

    #[tokio::test]
    async fn health_degrades_when_store_directory_disappears() {
        let outer = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&outer, &upstream, None).await;
        std::fs::remove_dir_all(outer.path()).unwrap();

        let response = build_router(state, 16)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, None).await;

        let response = build_router(state, 16)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[axum::http::header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test]
    async fn full_router_mounts_admin_and_public_routes() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = start_mock_upstream().await;
        let state = test_state(&dir, &upstream, Some(ADMIN_TOKEN)).await;
        let app = build_router(state, 16);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/handles")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The admin token is loaded from ADMIN_TOKEN env var or admin_token_file,
//! never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Base for delegation handle links; handles are listed without links when unset.
    #[serde(default)]
    pub public_base_url: Option<Url>,
    #[serde(skip)]
    pub admin_token: Option<Secret<String>>,
    /// Path to a file containing the admin token (alternative to ADMIN_TOKEN env var)
    #[serde(default)]
    pub admin_token_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Identity provider settings
#[derive(Debug, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_auth_base")]
    pub auth_base: Url,
    /// PEM public key overriding the embedded provider key.
    #[serde(default)]
    pub public_key_file: Option<PathBuf>,
    #[serde(default = "default_login_timeout")]
    pub login_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            auth_base: default_auth_base(),
            public_key_file: None,
            login_timeout_secs: default_login_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_issuer_base")]
    pub issuer_base: Url,
    /// Bound on each issuer request.
    #[serde(default = "default_issuer_timeout")]
    pub timeout_secs: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            issuer_base: default_issuer_base(),
            timeout_secs: default_issuer_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
        }
    }
}

fn default_max_connections() -> usize {
    256
}

fn default_auth_base() -> Url {
    Url::parse(idp_auth::AUTH_BASE).expect("AUTH_BASE is a valid URL")
}

fn default_issuer_base() -> Url {
    Url::parse(token_lifecycle::DEFAULT_ISSUER_BASE).expect("DEFAULT_ISSUER_BASE is a valid URL")
}

fn default_issuer_timeout() -> u64 {
    token_lifecycle::ISSUER_TIMEOUT.as_secs()
}

fn default_login_timeout() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    600
}

fn require_http(field: &str, url: &Url) -> common::Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(common::Error::Config(format!(
            "{field} must use http or https, got: {other}"
        ))),
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Admin token resolution order:
    /// 1. ADMIN_TOKEN env var
    /// 2. admin_token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http("identity.auth_base", &config.identity.auth_base)?;
        require_http("share.issuer_base", &config.share.issuer_base)?;
        if let Some(ref base) = config.server.public_base_url {
            require_http("server.public_base_url", base)?;
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.identity.login_timeout_secs == 0 {
            return Err(common::Error::Config(
                "login_timeout_secs must be greater than 0".into(),
            ));
        }
        if config.share.timeout_secs == 0 {
            return Err(common::Error::Config(
                "share.timeout_secs must be greater than 0".into(),
            ));
        }
        if config.refresh.interval_secs == 0 {
            return Err(common::Error::Config(
                "interval_secs must be greater than 0".into(),
            ));
        }
        if config.store.path.as_os_str().is_empty() {
            return Err(common::Error::Config("store.path is empty".into()));
        }

        if let Ok(token) = std::env::var("ADMIN_TOKEN") {
            config.server.admin_token = Some(Secret::new(token));
        } else if let Some(ref token_file) = config.server.admin_token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read admin_token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.server.admin_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("token-gateway.toml")
    }
}

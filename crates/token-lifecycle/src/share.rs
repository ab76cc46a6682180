//! Delegated share tokens
//!
//! Share tokens are opaque `fk-...` strings minted by a remote issuer in
//! exchange for a valid primary access token. They are never validated
//! locally: `resolve` asks the issuer who a token belongs to. Each stored
//! record keeps the parameters it was issued with and the owner's token expiry
//! at that moment, so a rotation of the primary token can be followed by an
//! in-place re-issue.

use std::sync::Arc;
use std::time::Duration;

use idp_auth::{CredentialStore, DelegatedShareToken, USER_AGENT, truncate_body, unix_now};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::manager::TokenManager;
use crate::metrics::record_share_issue;

/// Default public issuer.
pub const DEFAULT_ISSUER_BASE: &str = "https://ai.fakeopen.com";

/// Per-request bound on issuer calls unless overridden with `with_timeout`.
pub const ISSUER_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for issuing a share token.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub account_id: String,
    /// Issuer-side name; the same name for the same owner yields the same token.
    pub display_name: String,
    /// Empty means no site restriction.
    pub site_limit: String,
    /// Zero asks the issuer for a token that lives as long as the primary one.
    pub ttl: Duration,
    pub comment: String,
}

/// Owner metadata the issuer reports for a share token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareTokenInfo {
    pub owner_id: String,
    pub email: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReissueOutcome {
    /// Owner token has not rotated and the share token has not expired.
    Fresh,
    Reissued(DelegatedShareToken),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReissueFailure {
    pub token: String,
    pub account_id: String,
    pub error: String,
}

/// Result of one `reissue_all_stale` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReissueReport {
    pub reissued: Vec<String>,
    pub fresh: usize,
    pub failures: Vec<ReissueFailure>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    token_key: String,
    #[serde(default)]
    unique_name: String,
    expire_at: u64,
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    user_id: String,
    #[serde(default)]
    email: String,
    expire_at: u64,
}

pub struct ShareTokenService {
    manager: Arc<TokenManager>,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    issuer_base: Url,
    timeout: Duration,
    /// Serializes re-issues per owning account.
    reissue_locks: KeyedLocks,
}

impl ShareTokenService {
    pub fn new(manager: Arc<TokenManager>, issuer_base: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(idp_auth::Error::from)?;
        Ok(Self {
            store: manager.store().clone(),
            manager,
            client,
            issuer_base,
            timeout: ISSUER_TIMEOUT,
            reissue_locks: KeyedLocks::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Issue a share token for an account and store it.
    pub async fn issue(&self, request: IssueRequest) -> Result<DelegatedShareToken> {
        if request.display_name.trim().is_empty() {
            return Err(Error::InvalidRequest("display name is required".into()));
        }
        let ttl_secs = request.ttl.as_secs();
        let record = self
            .mint(
                &request.account_id,
                &request.display_name,
                &request.site_limit,
                ttl_secs,
                &request.comment,
            )
            .await?;
        self.store.put_share_token(record.clone()).await?;
        info!(
            account_id = %request.account_id,
            display_name = %request.display_name,
            expires_at = record.expires_at,
            "share token issued"
        );
        Ok(record)
    }

    /// Ask the issuer who owns `token`.
    pub async fn resolve(&self, token: &str) -> Result<ShareTokenInfo> {
        let url = self.endpoint(&["token", "info", token])?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(idp_auth::Error::from)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("share token {token}")));
        }
        if !status.is_success() {
            let body = truncate_body(response.text().await.unwrap_or_default());
            return Err(Error::IssuerRejected {
                status: status.as_u16(),
                body,
            });
        }

        let info: InfoResponse = response.json().await.map_err(|e| Error::IssuerRejected {
            status: status.as_u16(),
            body: format!("malformed token info: {e}"),
        })?;
        Ok(ShareTokenInfo {
            owner_id: info.user_id,
            email: info.email,
            expires_at: info.expire_at,
        })
    }

    /// Re-issue `token` with its original parameters if the owner's primary
    /// token rotated since it was issued, or if it has expired.
    ///
    /// Concurrent calls for the same owner are serialized. A token that was
    /// replaced while waiting reports `Fresh`.
    pub async fn reissue_if_stale(&self, token: &str) -> Result<ReissueOutcome> {
        let account_id = self
            .store
            .get_share_token(token)
            .await
            .ok_or_else(|| Error::NotFound(format!("share token {token}")))?
            .account_id;

        let _guard = self.reissue_locks.lock(&account_id).await;
        let Some(record) = self.store.get_share_token(token).await else {
            debug!(token, "share token replaced while waiting");
            return Ok(ReissueOutcome::Fresh);
        };

        let owner_expiry = self
            .store
            .get(&record.account_id)
            .await?
            .tokens
            .map(|t| t.expires_at)
            .unwrap_or_default();
        let rotated = owner_expiry > record.basis_expires_at;
        let expired = record.expires_at != 0 && record.expires_at <= unix_now();
        if !rotated && !expired {
            debug!(token, "share token still fresh");
            return Ok(ReissueOutcome::Fresh);
        }

        let replacement = self
            .mint(
                &record.account_id,
                &record.display_name,
                &record.site_limit,
                record.ttl_secs,
                &record.comment,
            )
            .await?;
        self.store
            .replace_share_token(&record.token, replacement.clone())
            .await?;
        info!(
            account_id = %record.account_id,
            rotated,
            expired,
            "share token re-issued"
        );
        Ok(ReissueOutcome::Reissued(replacement))
    }

    /// `reissue_if_stale` over every stored share token.
    pub async fn reissue_all_stale(&self) -> ReissueReport {
        let mut report = ReissueReport::default();
        for record in self.store.list_share_tokens().await {
            match self.reissue_if_stale(&record.token).await {
                Ok(ReissueOutcome::Fresh) => report.fresh += 1,
                Ok(ReissueOutcome::Reissued(new)) => report.reissued.push(new.token),
                Err(e) => {
                    warn!(account_id = %record.account_id, error = %e, "share token re-issue failed");
                    report.failures.push(ReissueFailure {
                        token: record.token,
                        account_id: record.account_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn list(&self) -> Vec<DelegatedShareToken> {
        self.store.list_share_tokens().await
    }

    /// Obtain a primary token and register a share token with the issuer.
    async fn mint(
        &self,
        account_id: &str,
        display_name: &str,
        site_limit: &str,
        ttl_secs: u64,
        comment: &str,
    ) -> Result<DelegatedShareToken> {
        let access = self.manager.ensure_valid_token(account_id).await?;
        let basis_expires_at = self
            .store
            .get(account_id)
            .await?
            .tokens
            .map(|t| t.expires_at)
            .unwrap_or_default();

        let result = self.register(&access, display_name, site_limit, ttl_secs).await;
        record_share_issue(if result.is_ok() { "success" } else { "failure" });
        let issued = result?;

        if !issued.unique_name.is_empty() && issued.unique_name != display_name {
            warn!(
                requested = display_name,
                returned = %issued.unique_name,
                "issuer returned a different unique name"
            );
        }

        Ok(DelegatedShareToken {
            token: issued.token_key,
            account_id: account_id.to_owned(),
            display_name: display_name.to_owned(),
            site_limit: site_limit.to_owned(),
            comment: comment.to_owned(),
            ttl_secs,
            expires_at: issued.expire_at,
            basis_expires_at,
            issued_at: unix_now(),
        })
    }

    async fn register(
        &self,
        access_token: &str,
        display_name: &str,
        site_limit: &str,
        ttl_secs: u64,
    ) -> Result<RegisterResponse> {
        let url = self.endpoint(&["token", "register"])?;
        let expires_in = ttl_secs.to_string();
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .form(&[
                ("unique_name", display_name),
                ("access_token", access_token),
                ("expires_in", expires_in.as_str()),
                ("site_limit", site_limit),
            ])
            .send()
            .await
            .map_err(idp_auth::Error::from)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = truncate_body(response.text().await.unwrap_or_default());
            return Err(Error::IssuerRejected {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(|e| Error::IssuerRejected {
            status: status.as_u16(),
            body: format!("malformed issue response: {e}"),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.issuer_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidRequest(format!("issuer base {} cannot take a path", self.issuer_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

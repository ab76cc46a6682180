//! Token lifecycle manager
//!
//! Answers "give me a valid access token for account X". A stored token that
//! has not reached its expiry is returned without any network call. Otherwise
//! the account's lock is taken, the store is re-read (a concurrent caller may
//! have renewed it meanwhile), and the manager tries the refresh grant, then a
//! full password login. The new token is validated and persisted in one write
//! before it is returned. If both paths fail the stored state stays as it was.
//!
//! Account lifecycle:
//! 1. `add_account` obtains a first token, derives id/kind from its claims
//! 2. `ensure_valid_token` serves it until expiry, then renews it
//! 3. `refresh_all_expired` renews every expired account in one pass
//! 4. `remove_account` drops the account with its handles and share tokens

use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use idp_auth::{
    Account, CredentialStore, DelegationHandle, LoginSecret, ProviderKind, TokenResponse,
    TokenState, TokenValidator, Upsert, unix_now,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::authenticator::Authenticator;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::metrics::{record_cache_hit, record_reauth};

/// Used when the caller does not supply a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Input for enrolling an account. At least one secret is required; with a
/// refresh token the first token comes from the refresh grant, otherwise from
/// a full login.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub email: String,
    pub password: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub comment: String,
}

/// Account view without secrets.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub provider: ProviderKind,
    pub login: &'static str,
    pub comment: String,
    pub expires_at: Option<u64>,
    pub token_valid: bool,
    pub created_at: u64,
}

impl AccountSummary {
    fn of(account: &Account, now: u64) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            provider: account.provider,
            login: match account.login {
                LoginSecret::Password { .. } => "password",
                LoginSecret::RefreshToken { .. } => "refresh_token",
            },
            comment: account.comment.clone(),
            expires_at: account.tokens.as_ref().map(|t| t.expires_at),
            token_valid: account.tokens.as_ref().is_some_and(|t| t.is_valid_at(now)),
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddedAccount {
    pub account: AccountSummary,
    /// False when the identifier was already enrolled.
    pub created: bool,
    pub handle: DelegationHandle,
}

/// Current token behind a delegation handle.
#[derive(Debug, Clone, Serialize)]
pub struct HandleToken {
    pub account_id: String,
    pub access_token: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub account_id: String,
    pub category: &'static str,
    pub error: String,
}

/// Result of one `refresh_all_expired` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    /// Accounts whose token was still valid.
    pub skipped: usize,
    pub failures: Vec<RefreshFailure>,
}

/// Owns token acquisition for every stored account.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    validator: Arc<TokenValidator>,
    authenticator: Arc<dyn Authenticator>,
    locks: KeyedLocks,
    timeout: Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<CredentialStore>,
        validator: Arc<TokenValidator>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            store,
            validator,
            authenticator,
            locks: KeyedLocks::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Default bound on one token acquisition (refresh plus login).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// Valid access token for `account_id`, renewing it if needed.
    pub async fn ensure_valid_token(&self, account_id: &str) -> Result<String> {
        self.ensure_valid_token_within(account_id, self.timeout)
            .await
    }

    /// Like [`ensure_valid_token`](Self::ensure_valid_token) with a caller
    /// supplied bound. On timeout the in-flight attempt is dropped, the lock
    /// is released and nothing is written.
    pub async fn ensure_valid_token_within(
        &self,
        account_id: &str,
        timeout: Duration,
    ) -> Result<String> {
        Ok(self.valid_tokens(account_id, timeout).await?.access)
    }

    pub(crate) async fn valid_tokens(&self, account_id: &str, timeout: Duration) -> Result<TokenState> {
        let account = self.store.get(account_id).await?;
        if let Some(tokens) = account.tokens.filter(|t| t.is_valid_at(unix_now())) {
            record_cache_hit();
            debug!(account_id, expires_at = tokens.expires_at, "cached token still valid");
            return Ok(tokens);
        }

        match tokio::time::timeout(timeout, self.reauthenticate(account_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    account_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "token acquisition timed out"
                );
                Err(Error::Timeout {
                    account_id: account_id.to_owned(),
                    after: timeout,
                })
            }
        }
    }

    async fn reauthenticate(&self, account_id: &str) -> Result<TokenState> {
        let _guard = self.locks.lock(account_id).await;

        // A caller that held the lock before us may already have renewed it.
        let account = self.store.get(account_id).await?;
        if let Some(tokens) = account.tokens.clone().filter(|t| t.is_valid_at(unix_now())) {
            debug!(account_id, "token renewed by concurrent caller");
            return Ok(tokens);
        }

        let tokens = self.obtain(&account).await?;
        self.store.update_tokens(account_id, tokens.clone()).await?;
        info!(account_id, expires_at = tokens.expires_at, "stored renewed token");
        Ok(tokens)
    }

    /// Refresh grant first, then full login. Nothing is persisted here.
    async fn obtain(&self, account: &Account) -> Result<TokenState> {
        let account_id = account.id.as_str();
        let mut attempts = Vec::new();

        match account.refresh_token() {
            Some(refresh) => {
                let result = match self.authenticator.refresh(refresh.expose()).await {
                    Ok(response) => self.accept(account, response, Some(refresh)),
                    Err(e) => Err(e.into()),
                };
                record_reauth("refresh", result.is_ok());
                match result {
                    Ok(tokens) => {
                        info!(account_id, "token refreshed");
                        return Ok(tokens);
                    }
                    Err(e) => {
                        warn!(account_id, error = %e, "refresh failed");
                        attempts.push(format!("refresh: {e}"));
                    }
                }
            }
            None => attempts.push("refresh: no refresh token stored".to_owned()),
        }

        match account.password() {
            Some(password) => {
                let result = match self
                    .authenticator
                    .login(&account.email, password.expose())
                    .await
                {
                    Ok(response) => self.accept(account, response, None),
                    Err(e) => Err(e.into()),
                };
                record_reauth("login", result.is_ok());
                match result {
                    Ok(tokens) => {
                        info!(account_id, "token obtained by full login");
                        return Ok(tokens);
                    }
                    Err(e) => {
                        warn!(account_id, error = %e, "full login failed");
                        attempts.push(format!("login: {e}"));
                    }
                }
            }
            None => attempts.push(format!(
                "login: not available for {} account",
                account.provider.label()
            )),
        }

        Err(Error::ReauthenticationFailed {
            account_id: account_id.to_owned(),
            detail: attempts.join("; "),
        })
    }

    /// Validate a provider response for `account` and turn it into the state
    /// to persist. `expires_at` always comes from the token's `exp` claim.
    fn accept(
        &self,
        account: &Account,
        response: TokenResponse,
        previous_refresh: Option<&Secret<String>>,
    ) -> Result<TokenState> {
        let claims = self.validator.validate(&response.access_token)?;
        if claims.account_id() != account.id {
            return Err(Error::AccountMismatch {
                expected: account.id.clone(),
                actual: claims.account_id().to_owned(),
            });
        }
        Ok(TokenState {
            access: response.access_token,
            refresh: response
                .refresh_token
                .map(Secret::from)
                .or_else(|| previous_refresh.cloned()),
            expires_at: claims.expiry(),
        })
    }

    /// Enroll an account and create its delegation handle.
    ///
    /// The identifier and provider kind come from the first token's claims.
    /// Enrolling an identifier twice keeps the original record.
    pub async fn add_account(&self, new: NewAccount) -> Result<AddedAccount> {
        let label = new.email.clone();
        match tokio::time::timeout(self.timeout, self.enroll(new)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                account_id: label,
                after: self.timeout,
            }),
        }
    }

    async fn enroll(&self, new: NewAccount) -> Result<AddedAccount> {
        let password = new.password.filter(|p| !p.is_blank());
        let refresh = new.refresh_token.filter(|r| !r.is_blank());

        let login = match (&password, &refresh) {
            (Some(password), _) => LoginSecret::Password {
                password: password.clone(),
            },
            (None, Some(refresh_token)) => LoginSecret::RefreshToken {
                refresh_token: refresh_token.clone(),
            },
            (None, None) => {
                return Err(Error::InvalidRequest(
                    "either a password or a refresh token is required".into(),
                ));
            }
        };
        if refresh.is_none() && new.email.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "email is required for password login".into(),
            ));
        }

        let response = match (&refresh, &login) {
            (Some(refresh_token), _) | (None, LoginSecret::RefreshToken { refresh_token }) => {
                let result = self.authenticator.refresh(refresh_token.expose()).await;
                record_reauth("refresh", result.is_ok());
                result?
            }
            (None, LoginSecret::Password { password }) => {
                let result = self.authenticator.login(&new.email, password.expose()).await;
                record_reauth("login", result.is_ok());
                result?
            }
        };

        let claims = self.validator.validate(&response.access_token)?;
        let account_id = claims.account_id().to_owned();
        let email = if claims.email().is_empty() {
            new.email.clone()
        } else {
            claims.email().to_owned()
        };
        let account = Account {
            id: account_id.clone(),
            email,
            login,
            provider: claims.provider_kind(),
            tokens: Some(TokenState {
                access: response.access_token,
                refresh: response.refresh_token.map(Secret::from).or(refresh),
                expires_at: claims.expiry(),
            }),
            comment: new.comment.clone(),
            created_at: unix_now(),
        };

        let _guard = self.locks.lock(&account_id).await;
        let outcome = self.store.upsert(account).await?;
        let handle = self.store.create_handle(&account_id, &new.comment).await?;
        let stored = self.store.get(&account_id).await?;
        info!(
            account_id = %account_id,
            provider = stored.provider.label(),
            created = outcome == Upsert::Created,
            "account enrolled"
        );

        Ok(AddedAccount {
            account: AccountSummary::of(&stored, unix_now()),
            created: outcome == Upsert::Created,
            handle,
        })
    }

    /// Drop an account and everything issued for it.
    pub async fn remove_account(&self, account_id: &str) -> Result<AccountSummary> {
        let _guard = self.locks.lock(account_id).await;
        let removed = self
            .store
            .remove(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        info!(account_id, "account removed");
        Ok(AccountSummary::of(&removed, unix_now()))
    }

    pub async fn list_accounts(&self) -> Vec<AccountSummary> {
        let now = unix_now();
        self.store
            .list_all()
            .await
            .iter()
            .map(|account| AccountSummary::of(account, now))
            .collect()
    }

    pub async fn create_handle(&self, account_id: &str, comment: &str) -> Result<DelegationHandle> {
        Ok(self.store.create_handle(account_id, comment).await?)
    }

    pub async fn list_handles(&self) -> Vec<DelegationHandle> {
        self.store.list_handles().await
    }

    /// Follow a handle to its account's current token, renewing it if needed.
    pub async fn resolve_handle(&self, id: &Uuid) -> Result<HandleToken> {
        let handle = self
            .store
            .get_handle(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("handle {id}")))?;
        let tokens = self.valid_tokens(&handle.account_id, self.timeout).await?;
        Ok(HandleToken {
            account_id: handle.account_id,
            access_token: tokens.access,
            expires_at: tokens.expires_at,
        })
    }

    /// Renew every account whose token is missing or expired.
    ///
    /// One account's failure never stops the pass; failures are reported.
    pub async fn refresh_all_expired(&self) -> RefreshReport {
        let now = unix_now();
        let mut report = RefreshReport::default();

        for account in self.store.list_all().await {
            if account.tokens.as_ref().is_some_and(|t| t.is_valid_at(now)) {
                report.skipped += 1;
                continue;
            }
            match self.valid_tokens(&account.id, self.timeout).await {
                Ok(_) => report.refreshed.push(account.id),
                Err(e) => {
                    warn!(account_id = %account.id, error = %e, "batch refresh failed for account");
                    report.failures.push(RefreshFailure {
                        account_id: account.id,
                        category: e.category(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            refreshed = report.refreshed.len(),
            skipped = report.skipped,
            failed = report.failures.len(),
            "refresh pass complete"
        );
        report
    }
}

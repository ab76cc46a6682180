//! Durable credential store
//!
//! One JSON document holding accounts, delegation handles and delegated share
//! tokens. All writes use atomic temp-file + rename and a tokio Mutex
//! serializes them. Every mutation is applied to a copy, written to disk, and
//! only then swapped into memory, so a failed or cancelled write leaves the
//! in-memory view untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::claims::{ProviderKind, unix_now};
use crate::error::{Error, Result};

/// Secret an account was enrolled with. Set once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoginSecret {
    /// Email (the account's `email`) plus password; allows full login.
    Password { password: Secret<String> },
    /// Enrolled with a refresh token only; no login fallback.
    RefreshToken { refresh_token: Secret<String> },
}

/// Current provider tokens of an account.
///
/// `expires_at` is the `exp` claim of `access` (unix seconds); the two are
/// only ever set together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenState {
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<Secret<String>>,
    pub expires_at: u64,
}

impl TokenState {
    /// Strictly before expiry.
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// One managed identity-provider account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Provider-assigned identifier (`user_id` claim).
    pub id: String,
    pub email: String,
    pub login: LoginSecret,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenState>,
    #[serde(default)]
    pub comment: String,
    pub created_at: u64,
}

impl Account {
    /// Newest refresh token known for this account.
    pub fn refresh_token(&self) -> Option<&Secret<String>> {
        self.tokens
            .as_ref()
            .and_then(|t| t.refresh.as_ref())
            .or(match &self.login {
                LoginSecret::RefreshToken { refresh_token } => Some(refresh_token),
                LoginSecret::Password { .. } => None,
            })
    }

    /// Password for full login, if the account has one and its provider
    /// kind accepts password login.
    pub fn password(&self) -> Option<&Secret<String>> {
        match &self.login {
            LoginSecret::Password { password }
                if self.provider.supports_password_login() && !password.is_blank() =>
            {
                Some(password)
            }
            _ => None,
        }
    }
}

/// Stable external reference resolving to an account's current token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationHandle {
    pub id: Uuid,
    pub account_id: String,
    #[serde(default)]
    pub comment: String,
    pub created_at: u64,
}

/// Provider-issued share token plus the parameters it was issued with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedShareToken {
    pub token: String,
    pub account_id: String,
    pub display_name: String,
    #[serde(default)]
    pub site_limit: String,
    #[serde(default)]
    pub comment: String,
    /// Requested lifetime in seconds, reused on re-issue.
    pub ttl_secs: u64,
    /// Expiry reported by the issuer (unix seconds).
    pub expires_at: u64,
    /// Owner's primary-token expiry when this token was issued.
    pub basis_expires_at: u64,
    pub issued_at: u64,
}

/// Outcome of [`CredentialStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Existing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
    #[serde(default)]
    handles: BTreeMap<Uuid, DelegationHandle>,
    #[serde(default)]
    share_tokens: BTreeMap<String, DelegatedShareToken>,
}

/// Store backed by a single JSON file.
///
/// Reads clone out of the in-memory copy under the lock, so callers never see
/// a half-applied mutation.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<StoreData>,
}

impl CredentialStore {
    /// Load the store from `path`.
    ///
    /// A missing file is a cold start: an empty document is written so the
    /// next load takes the normal path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading store file: {e}")))?;
            let data: StoreData = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing store file: {e}")))?;
            info!(
                path = %path.display(),
                accounts = data.accounts.len(),
                handles = data.handles.len(),
                share_tokens = data.share_tokens.len(),
                "loaded credential store"
            );
            data
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let data = StoreData::default();
            write_atomic(&path, &data).await?;
            data
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutate` to a copy, persist it, then publish it.
    async fn commit<T>(&self, mutate: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = mutate(&mut next)?;
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(out)
    }

    /// Insert an account, or refresh the token fields of an existing one.
    ///
    /// Identity and credential fields of an existing account are never
    /// overwritten; repeated calls with the same identifier are idempotent.
    pub async fn upsert(&self, account: Account) -> Result<Upsert> {
        self.commit(|data| match data.accounts.get_mut(&account.id) {
            Some(existing) => {
                if account.tokens.is_some() {
                    existing.tokens = account.tokens;
                }
                debug!(account_id = %existing.id, "upsert matched existing account");
                Ok(Upsert::Existing)
            }
            None => {
                debug!(account_id = %account.id, "created account");
                data.accounts.insert(account.id.clone(), account);
                Ok(Upsert::Created)
            }
        })
        .await
    }

    pub async fn get(&self, account_id: &str) -> Result<Account> {
        let state = self.state.lock().await;
        state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))
    }

    pub async fn list_all(&self) -> Vec<Account> {
        let state = self.state.lock().await;
        state.accounts.values().cloned().collect()
    }

    /// Replace an account's token state in one read-modify-write.
    pub async fn update_tokens(&self, account_id: &str, tokens: TokenState) -> Result<()> {
        self.commit(|data| {
            let account = data
                .accounts
                .get_mut(account_id)
                .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
            account.tokens = Some(tokens);
            Ok(())
        })
        .await?;
        debug!(account_id, "updated tokens");
        Ok(())
    }

    /// Remove an account together with its handles and share tokens.
    pub async fn remove(&self, account_id: &str) -> Result<Option<Account>> {
        let removed = self
            .commit(|data| {
                let removed = data.accounts.remove(account_id);
                if removed.is_some() {
                    data.handles.retain(|_, h| h.account_id != account_id);
                    data.share_tokens.retain(|_, t| t.account_id != account_id);
                }
                Ok(removed)
            })
            .await?;
        if removed.is_some() {
            debug!(account_id, "removed account");
        }
        Ok(removed)
    }

    /// Handle for `account_id`, created on first request.
    pub async fn create_handle(&self, account_id: &str, comment: &str) -> Result<DelegationHandle> {
        self.commit(|data| {
            if !data.accounts.contains_key(account_id) {
                return Err(Error::NotFound(format!("account {account_id}")));
            }
            if let Some(existing) = data.handles.values().find(|h| h.account_id == account_id) {
                return Ok(existing.clone());
            }
            let handle = DelegationHandle {
                id: Uuid::new_v4(),
                account_id: account_id.to_owned(),
                comment: comment.to_owned(),
                created_at: unix_now(),
            };
            debug!(account_id, handle = %handle.id, "created delegation handle");
            data.handles.insert(handle.id, handle.clone());
            Ok(handle)
        })
        .await
    }

    pub async fn get_handle(&self, id: &Uuid) -> Option<DelegationHandle> {
        let state = self.state.lock().await;
        state.handles.get(id).cloned()
    }

    pub async fn list_handles(&self) -> Vec<DelegationHandle> {
        let state = self.state.lock().await;
        state.handles.values().cloned().collect()
    }

    /// Store a freshly issued share token. The owner must exist.
    pub async fn put_share_token(&self, token: DelegatedShareToken) -> Result<()> {
        self.commit(|data| {
            if !data.accounts.contains_key(&token.account_id) {
                return Err(Error::NotFound(format!("account {}", token.account_id)));
            }
            data.share_tokens.insert(token.token.clone(), token);
            Ok(())
        })
        .await
    }

    /// Overwrite a share token with its re-issued replacement.
    pub async fn replace_share_token(&self, old: &str, new: DelegatedShareToken) -> Result<()> {
        self.commit(|data| {
            if data.share_tokens.remove(old).is_none() {
                return Err(Error::NotFound(format!("share token {old}")));
            }
            data.share_tokens.insert(new.token.clone(), new);
            Ok(())
        })
        .await
    }

    pub async fn get_share_token(&self, token: &str) -> Option<DelegatedShareToken> {
        let state = self.state.lock().await;
        state.share_tokens.get(token).cloned()
    }

    pub async fn list_share_tokens(&self) -> Vec<DelegatedShareToken> {
        let state = self.state.lock().await;
        state.share_tokens.values().cloned().collect()
    }

    /// Number of stored accounts.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write the store document atomically with 0600 permissions.
///
/// Temp file in the same directory, then rename over the target, so a crash
/// mid-write never leaves a truncated store.
async fn write_atomic(path: &Path, data: &StoreData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            email: format!("{id}@example.com"),
            login: LoginSecret::Password {
                password: "pw".into(),
            },
            provider: ProviderKind::Primary,
            tokens: Some(TokenState {
                access: format!("at_{id}"),
                refresh: Some(format!("rt_{id}").into()),
                expires_at: 1_900_000_000,
            }),
            comment: String::new(),
            created_at: 1_700_000_000,
        }
    }

    fn share_token(token: &str, owner: &str) -> DelegatedShareToken {
        DelegatedShareToken {
            token: token.into(),
            account_id: owner.into(),
            display_name: "demo".into(),
            site_limit: String::new(),
            comment: String::new(),
            ttl_secs: 3600,
            expires_at: 1_700_003_600,
            basis_expires_at: 1_900_000_000,
            issued_at: 1_700_000_000,
        }
    }

    async fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(dir.path().join("store.json")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.upsert(account("acct-1")).await.unwrap();
        let handle = store.create_handle("acct-1", "shared link").await.unwrap();
        store.put_share_token(share_token("fk-1", "acct-1")).await.unwrap();

        let reloaded = CredentialStore::load(path).await.unwrap();
        assert_eq!(reloaded.get("acct-1").await.unwrap(), account("acct-1"));
        assert_eq!(reloaded.get_handle(&handle.id).await, Some(handle));
        assert!(reloaded.get_share_token("fk-1").await.is_some());
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        assert!(!path.exists());
        let store = CredentialStore::load(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(parsed["accounts"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert!(matches!(
            CredentialStore::load(path).await,
            Err(Error::CredentialParse(_))
        ));
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_keeps_identity_fields() {
        let (_dir, store) = store().await;
        assert_eq!(store.upsert(account("acct-1")).await.unwrap(), Upsert::Created);

        let mut again = account("acct-1");
        again.email = "changed@example.com".into();
        again.comment = "changed".into();
        again.tokens = Some(TokenState {
            access: "at_new".into(),
            refresh: None,
            expires_at: 1_950_000_000,
        });
        assert_eq!(store.upsert(again).await.unwrap(), Upsert::Existing);
        assert_eq!(store.len().await, 1);

        let stored = store.get("acct-1").await.unwrap();
        assert_eq!(stored.email, "acct-1@example.com");
        assert_eq!(stored.comment, "");
        assert_eq!(stored.tokens.unwrap().access, "at_new");
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let (_dir, store) = store().await;
        assert!(matches!(store.get("ghost").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn update_tokens_replaces_whole_state() {
        let (_dir, store) = store().await;
        store.upsert(account("acct-1")).await.unwrap();

        let tokens = TokenState {
            access: "at_rotated".into(),
            refresh: Some("rt_rotated".into()),
            expires_at: 1_999_999_999,
        };
        store.update_tokens("acct-1", tokens.clone()).await.unwrap();
        assert_eq!(store.get("acct-1").await.unwrap().tokens, Some(tokens));
    }

    #[tokio::test]
    async fn update_nonexistent_account_errors() {
        let (_dir, store) = store().await;
        let result = store
            .update_tokens(
                "nonexistent",
                TokenState {
                    access: "at".into(),
                    refresh: None,
                    expires_at: 1,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.upsert(account("acct-1")).await.unwrap();

        // Directory in place of the file makes the final rename fail.
        tokio::fs::remove_file(&path).await.unwrap();
        tokio::fs::create_dir(&path).await.unwrap();
        tokio::fs::write(path.join("blocker"), "x").await.unwrap();

        let result = store
            .update_tokens(
                "acct-1",
                TokenState {
                    access: "at_lost".into(),
                    refresh: None,
                    expires_at: 2_000_000_000,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(
            store.get("acct-1").await.unwrap().tokens.unwrap().access,
            "at_acct-1"
        );
    }

    #[tokio::test]
    async fn remove_cascades_to_handles_and_share_tokens() {
        let (_dir, store) = store().await;
        store.upsert(account("acct-1")).await.unwrap();
        store.upsert(account("acct-2")).await.unwrap();
        store.create_handle("acct-1", "").await.unwrap();
        store.create_handle("acct-2", "").await.unwrap();
        store.put_share_token(share_token("fk-1", "acct-1")).await.unwrap();
        store.put_share_token(share_token("fk-2", "acct-2")).await.unwrap();

        assert!(store.remove("acct-1").await.unwrap().is_some());
        assert!(store.remove("acct-1").await.unwrap().is_none());

        let handles = store.list_handles().await;
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].account_id, "acct-2");
        assert!(store.get_share_token("fk-1").await.is_none());
        assert!(store.get_share_token("fk-2").await.is_some());
    }

    #[tokio::test]
    async fn create_handle_is_idempotent_per_account() {
        let (_dir, store) = store().await;
        store.upsert(account("acct-1")).await.unwrap();

        let first = store.create_handle("acct-1", "a").await.unwrap();
        let second = store.create_handle("acct-1", "b").await.unwrap();
        assert_eq!(first, second);
        assert!(matches!(
            store.create_handle("ghost", "").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn share_token_requires_owner_and_replaces_in_place() {
        let (_dir, store) = store().await;
        assert!(matches!(
            store.put_share_token(share_token("fk-1", "ghost")).await,
            Err(Error::NotFound(_))
        ));

        store.upsert(account("acct-1")).await.unwrap();
        store.put_share_token(share_token("fk-1", "acct-1")).await.unwrap();
        store
            .replace_share_token("fk-1", share_token("fk-2", "acct-1"))
            .await
            .unwrap();

        let tokens = store.list_share_tokens().await;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].token, "fk-2");
        assert!(matches!(
            store
                .replace_share_token("fk-1", share_token("fk-3", "acct-1"))
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn refresh_token_prefers_rotated_value() {
        let mut acct = account("acct-1");
        acct.login = LoginSecret::RefreshToken {
            refresh_token: "rt_enrolled".into(),
        };
        assert_eq!(acct.refresh_token().unwrap().expose(), "rt_acct-1");

        acct.tokens = None;
        assert_eq!(acct.refresh_token().unwrap().expose(), "rt_enrolled");
        assert!(acct.password().is_none());
    }

    #[test]
    fn federated_accounts_have_no_password_login() {
        let mut acct = account("acct-1");
        assert!(acct.password().is_some());
        acct.provider = ProviderKind::FederatedGoogle;
        assert!(acct.password().is_none());
    }

    #[test]
    fn account_debug_redacts_secrets() {
        let rendered = format!("{:?}", account("acct-1"));
        assert!(!rendered.contains("rt_acct-1"));
        assert!(!rendered.contains("\"pw\""));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = CredentialStore::load(path.clone()).await.unwrap();
        store.upsert(account("acct-1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(CredentialStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(account(&format!("acct-{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["accounts"].as_object().unwrap().len(), 10);
    }
}

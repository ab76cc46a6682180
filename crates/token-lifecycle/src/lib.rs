//! Token lifecycle for stored provider accounts
//!
//! Keeps a valid access token available for every enrolled account, renews
//! tokens by refresh grant or full login under a per-account lock, hands out
//! delegation handles, and manages delegated share tokens minted by a remote
//! issuer.
//!
//! Account lifecycle:
//! 1. Operator enrolls an account → first token validated, account stored
//! 2. Callers ask for a token → cached until expiry, then renewed once
//! 3. Background task renews expired tokens and re-issues stale share tokens
//! 4. Operator removes the account → handles and share tokens go with it

pub mod authenticator;
pub mod error;
pub mod identity;
pub mod locks;
pub mod manager;
pub mod metrics;
pub mod refresh;
pub mod share;

pub use authenticator::{Authenticator, BoxFuture, HttpAuthenticator};
pub use error::{Error, Result};
pub use identity::{BearerKind, Identity, identify};
pub use locks::KeyedLocks;
pub use manager::{
    AccountSummary, AddedAccount, DEFAULT_TIMEOUT, HandleToken, NewAccount, RefreshFailure,
    RefreshReport, TokenManager,
};
pub use refresh::spawn_refresh_task;
pub use share::{
    DEFAULT_ISSUER_BASE, ISSUER_TIMEOUT, IssueRequest, ReissueFailure, ReissueOutcome,
    ReissueReport, ShareTokenInfo, ShareTokenService,
};

//! Background renewal
//!
//! Spawns a periodic task that renews every expired account token and then
//! re-issues share tokens whose owner rotated. Failures are logged and counted;
//! the loop never stops on its own.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::manager::TokenManager;
use crate::metrics::record_refresh_cycle_failures;
use crate::share::ShareTokenService;

/// Spawn the renewal loop. Returns its `JoinHandle`.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    shares: Arc<ShareTokenService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; the store was just loaded.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&manager, &shares).await;
        }
    })
}

/// One pass: accounts first, so re-issued share tokens see the new tokens.
/// Returns the number of failures.
pub(crate) async fn refresh_cycle(manager: &TokenManager, shares: &ShareTokenService) -> usize {
    let accounts = manager.refresh_all_expired().await;
    for failure in &accounts.failures {
        warn!(
            account_id = %failure.account_id,
            category = failure.category,
            error = %failure.error,
            "background renewal failed, will retry next cycle"
        );
    }

    let tokens = shares.reissue_all_stale().await;

    let failed = accounts.failures.len() + tokens.failures.len();
    record_refresh_cycle_failures(failed);
    info!(
        accounts_refreshed = accounts.refreshed.len(),
        share_tokens_reissued = tokens.reissued.len(),
        failed,
        "background refresh cycle complete"
    );
    failed
}

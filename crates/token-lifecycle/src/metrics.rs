//! Lifecycle counters
//!
//! - `token_reauth_total` (counter): labels `method` (`refresh`|`login`), `outcome`
//! - `token_cache_hits_total` (counter)
//! - `share_token_issue_total` (counter): label `outcome`
//! - `refresh_cycle_failures_total` (counter)
//!
//! Recorded through the `metrics` facade; they are no-ops until the binary
//! installs a recorder.

pub fn record_reauth(method: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("token_reauth_total", "method" => method, "outcome" => outcome).increment(1);
}

pub fn record_cache_hit() {
    metrics::counter!("token_cache_hits_total").increment(1);
}

pub fn record_share_issue(outcome: &'static str) {
    metrics::counter!("share_token_issue_total", "outcome" => outcome).increment(1);
}

pub fn record_refresh_cycle_failures(count: usize) {
    metrics::counter!("refresh_cycle_failures_total").increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_reauth("refresh", true);
        record_cache_hit();
        record_share_issue("success");
        record_refresh_cycle_failures(2);
    }

    #[test]
    fn reauth_counter_carries_method_and_outcome() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_reauth("refresh", true);
        record_reauth("login", false);
        record_cache_hit();

        let output = handle.render();
        assert!(output.contains("token_reauth_total"));
        assert!(output.contains("method=\"refresh\""));
        assert!(output.contains("outcome=\"failure\""));
        assert!(output.contains("token_cache_hits_total"));
    }
}

//! Prometheus counters for the rewarded-video lifecycle

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::core::{ManagerError, ManagerResult};

// Ad requests handed to the transport, by kind (initial / failover)
pub(crate) static LOAD_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rvm_load_requests_total",
        "Ad requests issued by rvmediator",
        &["kind"]
    )
    .unwrap()
});

// Terminal load outcomes reported to the listener
pub(crate) static LOAD_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rvm_load_results_total",
        "Load outcomes reported by rvmediator",
        &["outcome"]
    )
    .unwrap()
});

pub(crate) static SHOWS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rvm_shows_total",
        "Show attempts handled by rvmediator",
        &["outcome"]
    )
    .unwrap()
});

pub(crate) static COMPLETIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "rvm_completions_total",
        "Reward completions delivered by rvmediator"
    )
    .unwrap()
});

pub(crate) fn record_request(failover: bool) {
    let kind = if failover { "failover" } else { "initial" };
    LOAD_REQUESTS.with_label_values(&[kind]).inc();
}

pub(crate) fn record_load(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    LOAD_RESULTS.with_label_values(&[outcome]).inc();
}

pub(crate) fn record_show(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    SHOWS.with_label_values(&[outcome]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn gather() -> ManagerResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| ManagerError::Configuration(format!("metrics encoding failed: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| ManagerError::Configuration(format!("metrics are not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_counters() {
        record_request(false);
        record_load(true);
        record_show(false);
        COMPLETIONS.inc();

        let text = gather().unwrap();
        assert!(text.contains("rvm_load_requests_total"));
        assert!(text.contains("rvm_load_results_total"));
        assert!(text.contains("rvm_shows_total"));
        assert!(text.contains("rvm_completions_total"));
    }
}

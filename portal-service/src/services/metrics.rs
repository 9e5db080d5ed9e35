//! Prometheus metrics for portal-service.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge, TextEncoder};

/// Authentication attempts by method and outcome (`success` or an error kind).
pub static AUTH_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_auth_attempts_total",
        "Total number of authentication attempts",
        &["method", "outcome"]
    )
    .expect("Failed to register auth_attempts_total")
});

pub static VOUCHER_REDEMPTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_voucher_redemptions_total",
        "Total number of voucher redemption attempts",
        &["outcome"]
    )
    .expect("Failed to register voucher_redemptions_total")
});

/// Router grant/revoke calls by operation and outcome.
pub static PROVISIONING_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_provisioning_total",
        "Total number of router provisioning operations",
        &["operation", "outcome"]
    )
    .expect("Failed to register provisioning_total")
});

/// Conditions an operator has to look at.
pub static OPERATIONAL_ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_operational_alerts_total",
        "Total number of operational alerts raised",
        &["kind"]
    )
    .expect("Failed to register operational_alerts_total")
});

pub static RECONCILIATION_ACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "portal_reconciliation_actions_total",
        "Total number of corrective actions taken by reconciliation",
        &["action"]
    )
    .expect("Failed to register reconciliation_actions_total")
});

pub static ACTIVE_SESSIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("portal_active_sessions", "Number of live portal sessions")
        .expect("Failed to register active_sessions")
});

pub fn record_auth_attempt(method: &str, outcome: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[method, outcome]).inc();
}

pub fn record_voucher_redemption(outcome: &str) {
    VOUCHER_REDEMPTIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_provisioning(operation: &str, outcome: &str) {
    PROVISIONING_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_alert(kind: &str) {
    OPERATIONAL_ALERTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_reconciliation(action: &str) {
    RECONCILIATION_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn alert_count(kind: &str) -> u64 {
    OPERATIONAL_ALERTS_TOTAL.with_label_values(&[kind]).get()
}

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&AUTH_ATTEMPTS_TOTAL);
    Lazy::force(&VOUCHER_REDEMPTIONS_TOTAL);
    Lazy::force(&PROVISIONING_TOTAL);
    Lazy::force(&OPERATIONAL_ALERTS_TOTAL);
    Lazy::force(&RECONCILIATION_ACTIONS_TOTAL);
    Lazy::force(&ACTIVE_SESSIONS);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

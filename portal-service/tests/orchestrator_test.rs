mod common;

use common::{test_config_with, TestPortal, SOCIAL_CODE, SOCIAL_PROVIDER};
use portal_service::{
    models::{AuthMethod, Credential, VoucherState},
    services::{metrics, AuthError, MockAddBehavior, RadiusError, RouterError},
};
use serde_json::json;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_local_login_uses_default_ttl() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;

    let session = portal
        .orchestrator
        .authenticate(Credential::password("alice", "correct horse"))
        .await
        .unwrap();

    assert_eq!(session.identity.user_id, "local:alice");
    assert_eq!(
        session.expires_at - session.created_at,
        chrono::Duration::seconds(3600)
    );
    assert_eq!(portal.router.entry_count(), 1);
    assert_eq!(session.session_id.len(), 43);
}

#[tokio::test]
async fn test_falls_back_to_radius_when_local_rejects() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;

    let session = portal
        .orchestrator
        .authenticate(Credential::password("radius-user", "radius-pass"))
        .await
        .unwrap();

    assert_eq!(session.identity.user_id, "radius:radius-user");
    assert!(!session.identity.is_admin);
}

#[tokio::test]
async fn test_all_backends_reject() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;

    let result = portal
        .orchestrator
        .authenticate(Credential::password("alice", "wrong"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::InvalidCredential);
    assert_eq!(portal.router.add_calls(), 0);
    assert!(portal.orchestrator.sessions().is_empty());
}

#[tokio::test]
async fn test_rejection_preferred_over_radius_outage() {
    let portal = TestPortal::new();
    portal.radius.set_failure(Some(RadiusError::Timeout));

    let result = portal
        .orchestrator
        .authenticate(Credential::password("radius-user", "radius-pass"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::InvalidCredential);
}

#[tokio::test]
async fn test_provisioning_failure_after_spend_keeps_voucher_redeemed() {
    let portal = TestPortal::new();
    portal.add_voucher("SPENT1", HOUR).await;
    portal
        .router
        .script_adds([MockAddBehavior::Fail(RouterError::Rejected("profile missing".into()))]);
    let before = metrics::alert_count("provisioning_failed_after_spend");

    let result = portal
        .orchestrator
        .authenticate(Credential::voucher("SPENT1"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::ProvisioningFailed);
    assert_eq!(portal.voucher_state("SPENT1").await, VoucherState::Redeemed);
    assert!(portal.orchestrator.sessions().is_empty());
    assert_eq!(portal.router.entry_count(), 0);
    assert_eq!(
        metrics::alert_count("provisioning_failed_after_spend"),
        before + 1
    );
}

#[tokio::test]
async fn test_unrepresentable_voucher_duration_fails_before_router_call() {
    let portal = TestPortal::new();
    // Ten trillion minutes overflows any representable expiry instant
    portal
        .add_voucher("LONG01", Duration::from_secs(600_000_000_000_000))
        .await;

    let result = portal
        .orchestrator
        .authenticate(Credential::voucher("LONG01"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::ProvisioningFailed);
    assert_eq!(portal.router.add_calls(), 0);
    assert_eq!(portal.router.entry_count(), 0);
    assert!(portal.orchestrator.sessions().is_empty());
    assert_eq!(portal.voucher_state("LONG01").await, VoucherState::Redeemed);
}

#[tokio::test]
async fn test_router_outage_on_password_login() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;
    portal
        .router
        .script_adds([MockAddBehavior::Fail(RouterError::Unavailable("down".into()))]);

    let result = portal
        .orchestrator
        .authenticate(Credential::password("alice", "correct horse"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::RouterUnavailable);
    assert!(portal.orchestrator.sessions().is_empty());
}

#[tokio::test]
async fn test_grant_retry_reuses_entry_created_by_timed_out_attempt() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;
    portal.router.script_adds([MockAddBehavior::TimeoutAfterCommit]);

    let session = portal
        .orchestrator
        .authenticate(Credential::password("alice", "correct horse"))
        .await
        .unwrap();

    assert_eq!(portal.router.add_calls(), 1);
    assert_eq!(portal.router.entry_count(), 1);
    assert!(portal.router.contains(&session.provisioning.router_handle));
}

#[tokio::test]
async fn test_grant_gives_up_after_one_retry() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;
    portal.router.script_adds([
        MockAddBehavior::Fail(RouterError::Timeout),
        MockAddBehavior::Fail(RouterError::Timeout),
    ]);

    let result = portal
        .orchestrator
        .authenticate(Credential::password("alice", "correct horse"))
        .await;

    assert_eq!(result.unwrap_err(), AuthError::RouterUnavailable);
    assert_eq!(portal.router.add_calls(), 2);
    assert_eq!(portal.router.entry_count(), 0);
}

#[tokio::test]
async fn test_disabled_voucher_login() {
    let portal = TestPortal::with_config(test_config_with(json!({
        "features": { "voucher_enabled": false, "social_login_enabled": false }
    })));
    portal.add_voucher("OFF001", HOUR).await;

    let voucher = portal
        .orchestrator
        .authenticate(Credential::voucher("OFF001"))
        .await;
    assert_eq!(
        voucher.unwrap_err(),
        AuthError::MethodDisabled(AuthMethod::Voucher)
    );
    assert_eq!(portal.billing.call_count(), 0);
    assert_eq!(portal.voucher_state("OFF001").await, VoucherState::Unused);

    let social = portal
        .orchestrator
        .authenticate(Credential::social(SOCIAL_PROVIDER, SOCIAL_CODE))
        .await;
    assert_eq!(
        social.unwrap_err(),
        AuthError::MethodDisabled(AuthMethod::Social)
    );
}

#[tokio::test]
async fn test_social_login() {
    let portal = TestPortal::new();

    let session = portal
        .orchestrator
        .authenticate(Credential::social("Google", SOCIAL_CODE))
        .await
        .unwrap();
    assert_eq!(session.identity.user_id, "google:1234567890");
    assert_eq!(session.identity.display_name, "Guest User");

    let bad_code = portal
        .orchestrator
        .authenticate(Credential::social(SOCIAL_PROVIDER, "forged"))
        .await;
    assert_eq!(bad_code.unwrap_err(), AuthError::InvalidCredential);

    let unknown = portal
        .orchestrator
        .authenticate(Credential::social("myspace", SOCIAL_CODE))
        .await;
    assert_eq!(
        unknown.unwrap_err(),
        AuthError::UnsupportedProvider("myspace".to_string())
    );
}

#[tokio::test]
async fn test_stats() {
    let portal = TestPortal::new();
    portal.add_user("alice", "correct horse", false).await;
    portal.add_voucher("STAT01", HOUR).await;
    portal.add_voucher("STAT02", HOUR).await;

    portal
        .orchestrator
        .authenticate(Credential::password("alice", "correct horse"))
        .await
        .unwrap();
    portal
        .orchestrator
        .authenticate(Credential::voucher("STAT01"))
        .await
        .unwrap();
    portal.clock.advance(Duration::from_secs(90));

    let stats = portal.orchestrator.stats().await.unwrap();
    assert_eq!(stats.active_sessions, 2);
    assert_eq!(stats.router_active_hosts, Some(2));
    assert_eq!(stats.vouchers_by_state.get("redeemed"), Some(&1));
    assert_eq!(stats.vouchers_by_state.get("unused"), Some(&1));
    assert_eq!(stats.uptime_secs, 90);
}

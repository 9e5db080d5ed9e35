mod common;

use common::TestPortal;
use portal_service::{
    models::Credential,
    services::{metrics, AuthError, SessionError},
};
use std::sync::Arc;
use std::time::Duration;

async fn login(portal: &TestPortal, username: &str) -> portal_service::models::Session {
    portal
        .orchestrator
        .authenticate(Credential::password(username, "pw"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let session = login(&portal, "alice").await;

    portal.orchestrator.logout(&session.session_id).await;
    portal.orchestrator.logout(&session.session_id).await;

    assert_eq!(portal.router.remove_calls(), 1);
    assert_eq!(portal.router.entry_count(), 0);
    assert_eq!(
        portal.orchestrator.get_session(&session.session_id).await.unwrap_err(),
        AuthError::SessionNotFound
    );
}

#[tokio::test]
async fn test_logout_of_unknown_session_is_noop() {
    let portal = TestPortal::new();

    portal.orchestrator.logout("no-such-session").await;

    assert_eq!(portal.router.remove_calls(), 0);
}

#[tokio::test]
async fn test_session_unusable_after_expiry() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let session = login(&portal, "alice").await;

    portal.clock.advance(Duration::from_secs(3599));
    assert!(portal.orchestrator.get_session(&session.session_id).await.is_ok());

    portal.clock.advance(Duration::from_secs(1));
    assert_eq!(
        portal.orchestrator.get_session(&session.session_id).await.unwrap_err(),
        AuthError::SessionExpired
    );
    assert_eq!(portal.router.entry_count(), 0);
    assert_eq!(portal.router.remove_calls(), 1);

    // Already evicted, so the sweep has nothing left to do
    assert_eq!(portal.workers.sweep_once().await, 0);
    assert_eq!(portal.router.remove_calls(), 1);
}

#[tokio::test]
async fn test_sweep_revokes_expired_sessions() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    portal.add_user("bob", "pw", false).await;
    portal.add_voucher("SHORT1", Duration::from_secs(600)).await;

    login(&portal, "alice").await;
    login(&portal, "bob").await;
    let short = portal
        .orchestrator
        .authenticate(Credential::voucher("SHORT1"))
        .await
        .unwrap();
    assert_eq!(portal.router.entry_count(), 3);

    portal.clock.advance(Duration::from_secs(600));
    assert_eq!(portal.workers.sweep_once().await, 1);
    assert!(!portal.router.contains(&short.provisioning.router_handle));
    assert_eq!(portal.orchestrator.sessions().len(), 2);

    portal.clock.advance(Duration::from_secs(3000));
    assert_eq!(portal.workers.sweep_once().await, 2);
    assert_eq!(portal.router.entry_count(), 0);
    assert!(portal.orchestrator.sessions().is_empty());
}

#[tokio::test]
async fn test_sessions_and_router_entries_stay_one_to_one() {
    let portal = TestPortal::new();
    for name in ["u1", "u2", "u3", "u4"] {
        portal.add_user(name, "pw", false).await;
    }

    let sessions = [
        login(&portal, "u1").await,
        login(&portal, "u2").await,
        login(&portal, "u3").await,
        login(&portal, "u4").await,
    ];
    assert_eq!(portal.orchestrator.sessions().len(), portal.router.entry_count());

    portal.orchestrator.logout(&sessions[1].session_id).await;
    portal.orchestrator.logout(&sessions[3].session_id).await;
    assert_eq!(portal.orchestrator.sessions().len(), 2);
    assert_eq!(portal.orchestrator.sessions().len(), portal.router.entry_count());

    for session in portal.orchestrator.list_active_sessions() {
        assert!(portal.router.contains(&session.provisioning.router_handle));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logout_and_sweep_revoke_once() {
    let portal = Arc::new(TestPortal::new());
    portal.add_user("alice", "pw", false).await;
    let session = login(&portal, "alice").await;
    portal.clock.advance(Duration::from_secs(3600));

    let logout = {
        let portal = Arc::clone(&portal);
        let id = session.session_id.clone();
        tokio::spawn(async move { portal.orchestrator.logout(&id).await })
    };
    let sweep = {
        let portal = Arc::clone(&portal);
        tokio::spawn(async move { portal.workers.sweep_once().await })
    };
    logout.await.unwrap();
    sweep.await.unwrap();

    assert_eq!(portal.router.remove_calls(), 1);
    assert!(portal.orchestrator.sessions().is_empty());
}

#[tokio::test]
async fn test_failed_revocation_raises_alert() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let session = login(&portal, "alice").await;
    let before = metrics::alert_count("revocation_failed");

    portal.router.set_fail_removes(true);
    portal.orchestrator.logout(&session.session_id).await;

    assert!(portal.orchestrator.sessions().is_empty());
    assert_eq!(portal.router.entry_count(), 1);
    assert!(metrics::alert_count("revocation_failed") > before);
}

#[tokio::test]
async fn test_store_reports_not_found() {
    let portal = TestPortal::new();
    assert_eq!(
        portal.orchestrator.sessions().get("missing").await.unwrap_err(),
        SessionError::SessionNotFound
    );
}

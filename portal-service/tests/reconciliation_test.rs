mod common;

use common::{test_config_with, TestPortal};
use portal_service::{models::Credential, services::ReconcileReport};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_orphaned_entry_is_revoked() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let live = portal
        .orchestrator
        .authenticate(Credential::password("alice", "pw"))
        .await
        .unwrap();
    // Left behind by a process that crashed between grant and session commit
    let orphan = portal.router.insert_entry("ghost-12345678", "portal:dead-session");
    // Not ours; never touched
    let foreign = portal.router.insert_entry("staff-laptop", "managed by hand");

    let report = portal
        .orchestrator
        .coordinator()
        .reconcile(portal.orchestrator.sessions())
        .await
        .unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            orphans_revoked: 1,
            ..Default::default()
        }
    );
    assert!(!portal.router.contains(&orphan));
    assert!(portal.router.contains(&foreign));
    assert!(portal.router.contains(&live.provisioning.router_handle));
}

#[tokio::test]
async fn test_entry_left_by_failed_logout_is_revoked_later() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let session = portal
        .orchestrator
        .authenticate(Credential::password("alice", "pw"))
        .await
        .unwrap();

    portal.router.set_fail_removes(true);
    portal.orchestrator.logout(&session.session_id).await;
    assert_eq!(portal.router.entry_count(), 1);

    portal.router.set_fail_removes(false);
    portal.workers.reconcile_once().await;
    assert_eq!(portal.router.entry_count(), 0);
}

#[tokio::test]
async fn test_startup_recovery_revokes_previous_run_entries() {
    let portal = TestPortal::new();
    portal.router.insert_entry("old-1", "portal:previous-run-1");
    portal.router.insert_entry("old-2", "portal:previous-run-2");

    portal.workers.recover().await;

    assert_eq!(portal.router.entry_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_grant_is_not_revoked() {
    let portal = Arc::new(TestPortal::new());
    portal.add_user("alice", "pw", false).await;
    portal.router.set_add_delay(Some(Duration::from_millis(200)));

    let login = {
        let portal = Arc::clone(&portal);
        tokio::spawn(async move {
            portal
                .orchestrator
                .authenticate(Credential::password("alice", "pw"))
                .await
        })
    };

    // Let the grant start, then reconcile repeatedly while it completes
    tokio::time::sleep(Duration::from_millis(50)).await;
    for _ in 0..10 {
        portal.workers.reconcile_once().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let session = login.await.unwrap().unwrap();
    portal.workers.reconcile_once().await;

    assert!(portal.router.contains(&session.provisioning.router_handle));
    assert_eq!(portal.router.remove_calls(), 0);
    assert!(portal.orchestrator.sessions().contains(&session.session_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_grants_finishing_during_reconcile_are_kept() {
    let portal = Arc::new(TestPortal::new());
    portal.add_user("alice", "pw", false).await;
    // Short grants so many complete while a pass is walking the entries
    portal.router.set_add_delay(Some(Duration::from_millis(2)));

    let logins = (0..24)
        .map(|i| {
            let portal = Arc::clone(&portal);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 3)).await;
                portal
                    .orchestrator
                    .authenticate(Credential::password("alice", "pw"))
                    .await
            })
        })
        .collect::<Vec<_>>();

    let reconciler = {
        let portal = Arc::clone(&portal);
        tokio::spawn(async move {
            for _ in 0..60 {
                portal.workers.reconcile_once().await;
                tokio::task::yield_now().await;
            }
        })
    };

    let mut sessions = Vec::new();
    for login in logins {
        sessions.push(login.await.unwrap().unwrap());
    }
    reconciler.await.unwrap();

    assert_eq!(portal.router.remove_calls(), 0);
    assert_eq!(portal.router.entry_count(), sessions.len());
    for session in &sessions {
        assert!(portal.router.contains(&session.provisioning.router_handle));
    }
    let report = portal
        .orchestrator
        .coordinator()
        .reconcile(portal.orchestrator.sessions())
        .await
        .unwrap();
    assert_eq!(report.orphans_revoked, 0);
}

#[tokio::test]
async fn test_missing_entry_reprovisioned_once() {
    let portal = TestPortal::new();
    portal.add_user("alice", "pw", false).await;
    let session = portal
        .orchestrator
        .authenticate(Credential::password("alice", "pw"))
        .await
        .unwrap();
    portal.clock.advance(Duration::from_secs(600));

    // An operator deleted the hotspot user
    portal.router.drop_entry(&session.provisioning.router_handle);

    let report = portal
        .orchestrator
        .coordinator()
        .reconcile(portal.orchestrator.sessions())
        .await
        .unwrap();
    assert_eq!(report.reprovisioned, 1);

    let current = portal.orchestrator.sessions().peek(&session.session_id).unwrap();
    assert_ne!(current.provisioning.router_handle, session.provisioning.router_handle);
    assert!(portal.router.contains(&current.provisioning.router_handle));
    assert_eq!(current.expires_at, session.expires_at);
    assert_eq!(current.provisioning.expires_at, session.expires_at);

    // Second loss: the session is terminated instead
    portal.router.drop_entry(&current.provisioning.router_handle);
    let report = portal
        .orchestrator
        .coordinator()
        .reconcile(portal.orchestrator.sessions())
        .await
        .unwrap();
    assert_eq!(report.terminated, 1);
    assert!(!portal.orchestrator.sessions().contains(&session.session_id));
}

#[tokio::test]
async fn test_missing_entry_terminated_by_policy() {
    let portal = TestPortal::with_config(test_config_with(json!({
        "provisioning": { "missing_entry_policy": "terminate" }
    })));
    portal.add_user("alice", "pw", false).await;
    let session = portal
        .orchestrator
        .authenticate(Credential::password("alice", "pw"))
        .await
        .unwrap();
    portal.router.drop_entry(&session.provisioning.router_handle);

    let report = portal
        .orchestrator
        .coordinator()
        .reconcile(portal.orchestrator.sessions())
        .await
        .unwrap();

    assert_eq!(report.terminated, 1);
    assert_eq!(report.reprovisioned, 0);
    assert!(portal.orchestrator.sessions().is_empty());
    assert_eq!(portal.router.add_calls(), 1);
}

#[tokio::test]
async fn test_background_loops_stop_on_cancellation() {
    let portal = TestPortal::with_config(test_config_with(json!({
        "session": { "default_ttl_secs": 3600, "sweep_interval_secs": 1 },
        "provisioning": { "reconcile_interval_secs": 1 },
        "voucher": { "janitor_interval_secs": 1 }
    })));
    portal.router.insert_entry("stray", "portal:stray-session");

    let token = tokio_util::sync::CancellationToken::new();
    let handles = Arc::clone(&portal.workers).spawn(token.clone());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(portal.router.entry_count(), 0);

    token.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker stops after cancellation")
            .unwrap();
    }
}

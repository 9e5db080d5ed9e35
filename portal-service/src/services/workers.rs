//! Periodic maintenance loops: session expiry, router reconciliation and the
//! voucher reservation janitor.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::ledger::VoucherLedger;
use crate::services::provisioning::ProvisioningCoordinator;
use crate::services::sessions::SessionStore;

#[derive(Debug, Clone)]
pub struct WorkerIntervals {
    pub sweep: Duration,
    pub reconcile: Duration,
    pub janitor: Duration,
}

pub struct BackgroundWorkers {
    sessions: Arc<SessionStore>,
    coordinator: Arc<ProvisioningCoordinator>,
    ledger: Arc<VoucherLedger>,
    intervals: WorkerIntervals,
}

impl BackgroundWorkers {
    pub fn new(
        sessions: Arc<SessionStore>,
        coordinator: Arc<ProvisioningCoordinator>,
        ledger: Arc<VoucherLedger>,
        intervals: WorkerIntervals,
    ) -> Self {
        Self {
            sessions,
            coordinator,
            ledger,
            intervals,
        }
    }

    /// Startup recovery: nothing can be mid-redemption yet, so every
    /// reservation is released; router entries left by a previous process
    /// have no session and are revoked.
    pub async fn recover(&self) {
        match self.ledger.release_all_reservations().await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count = count, "Released reservations left by previous run"),
            Err(e) => tracing::error!(error = %e, "Startup reservation release failed"),
        }
        self.reconcile_once().await;
    }

    pub async fn sweep_once(&self) -> usize {
        self.sessions.sweep_expired().await
    }

    pub async fn reconcile_once(&self) {
        match self.coordinator.reconcile(&self.sessions).await {
            Ok(report) => tracing::debug!(?report, "Reconciliation pass complete"),
            Err(e) => tracing::warn!(error = %e, "Reconciliation pass skipped"),
        }
    }

    pub async fn janitor_once(&self) {
        if let Err(e) = self.ledger.release_stale_reservations().await {
            tracing::error!(error = %e, "Voucher janitor pass failed");
        }
    }

    /// Spawn the three loops. Each stops at the next tick after `shutdown`
    /// is cancelled; a pass already running completes first.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let sweep = {
            let workers = Arc::clone(&self);
            let every = self.intervals.sweep;
            run_every("session_sweep", every, shutdown.clone(), move || {
                let workers = Arc::clone(&workers);
                async move {
                    workers.sweep_once().await;
                }
            })
        };

        let reconcile = {
            let workers = Arc::clone(&self);
            let every = self.intervals.reconcile;
            run_every("reconciliation", every, shutdown.clone(), move || {
                let workers = Arc::clone(&workers);
                async move { workers.reconcile_once().await }
            })
        };

        let janitor = {
            let workers = Arc::clone(&self);
            let every = self.intervals.janitor;
            run_every("voucher_janitor", every, shutdown, move || {
                let workers = Arc::clone(&workers);
                async move { workers.janitor_once().await }
            })
        };

        vec![sweep, reconcile, janitor]
    }
}

fn run_every<F, Fut>(
    name: &'static str,
    every: Duration,
    shutdown: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; startup recovery already ran.
        ticker.tick().await;

        tracing::info!(worker = name, interval_secs = every.as_secs(), "Worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker = name, "Worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    pass().await;
                }
            }
        }
    })
}

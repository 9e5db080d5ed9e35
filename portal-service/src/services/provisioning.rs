//! Router-side network grants and their reversal.

use dashmap::DashSet;
use service_core::retry::{retry_call, RetryConfig};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MissingEntryPolicy;
use crate::models::{Identity, ProvisioningRecord, RouterHandle};
use crate::services::clock::{checked_offset, Clock};
use crate::services::error::{ProvisioningError, RevocationError, RouterError};
use crate::services::metrics;
use crate::services::router::{HotspotRouter, HotspotUserSpec};
use crate::services::sessions::SessionStore;
use crate::utils::generate_hotspot_password;

/// Router entries created by the portal carry this comment prefix.
pub const IDEMPOTENCY_PREFIX: &str = "portal:";

const MAX_USER_ID_CHARS: usize = 24;

pub fn idempotency_key(session_id: &str) -> String {
    format!("{}{}", IDEMPOTENCY_PREFIX, session_id)
}

/// `<sanitized user id>-<first 8 chars of session id>`.
pub fn network_user_name(identity: &Identity, session_id: &str) -> String {
    let sanitize = |c: char| {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            c
        } else {
            '-'
        }
    };
    let user: String = identity
        .user_id
        .chars()
        .map(sanitize)
        .take(MAX_USER_ID_CHARS)
        .collect();
    let suffix: String = session_id.chars().map(sanitize).take(8).collect();
    format!("{}-{}", user, suffix)
}

#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub profile: String,
    pub call_timeout: Duration,
    pub retry: RetryConfig,
    pub missing_entry_policy: MissingEntryPolicy,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            call_timeout: Duration::from_secs(5),
            retry: RetryConfig::once(),
            missing_entry_policy: MissingEntryPolicy::Reprovision,
        }
    }
}

/// Marks a session id whose grant is not yet backed by a stored session.
/// Reconciliation leaves such entries alone; dropping the guard ends the mark.
pub struct InFlightGrant {
    in_flight: Arc<DashSet<String>>,
    session_id: String,
}

impl Drop for InFlightGrant {
    fn drop(&mut self) {
        self.in_flight.remove(&self.session_id);
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphans_revoked: usize,
    pub reprovisioned: usize,
    pub terminated: usize,
    pub failures: usize,
}

pub struct ProvisioningCoordinator {
    router: Arc<dyn HotspotRouter>,
    clock: Arc<dyn Clock>,
    settings: ProvisioningSettings,
    in_flight: Arc<DashSet<String>>,
}

impl ProvisioningCoordinator {
    pub fn new(
        router: Arc<dyn HotspotRouter>,
        clock: Arc<dyn Clock>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            router,
            clock,
            settings,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub fn router(&self) -> &Arc<dyn HotspotRouter> {
        &self.router
    }

    pub fn track_in_flight(&self, session_id: &str) -> InFlightGrant {
        self.in_flight.insert(session_id.to_string());
        InFlightGrant {
            in_flight: Arc::clone(&self.in_flight),
            session_id: session_id.to_string(),
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RouterError>
    where
        F: Future<Output = Result<T, RouterError>>,
    {
        tokio::time::timeout(self.settings.call_timeout, call)
            .await
            .unwrap_or(Err(RouterError::Timeout))
    }

    /// Create a hotspot user for `identity` limited to `duration` of uptime.
    ///
    /// A timed-out add is retried once under the same idempotency key; the
    /// retry first looks the key up so a create that landed is not repeated.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn grant(
        &self,
        identity: &Identity,
        session_id: &str,
        duration: Duration,
    ) -> Result<ProvisioningRecord, ProvisioningError> {
        let granted_at = self.clock.now();
        let Some(expires_at) = checked_offset(granted_at, duration) else {
            metrics::record_provisioning("grant", "failure");
            warn!(duration_secs = duration.as_secs(), "Grant duration out of range");
            return Err(ProvisioningError::ProvisioningFailed(
                "grant duration out of range".to_string(),
            ));
        };

        let key = idempotency_key(session_id);
        let spec = HotspotUserSpec {
            name: network_user_name(identity, session_id),
            password: generate_hotspot_password(),
            profile: self.settings.profile.clone(),
            uptime_limit: duration,
            comment: key.clone(),
        };

        let result = retry_call(&self.settings.retry, "hotspot_user_add", |attempt| {
            let spec = &spec;
            let key = key.as_str();
            async move {
                if attempt > 0 {
                    if let Some(existing) = self.bounded(self.router.find_by_key(key)).await? {
                        info!(handle = %existing.handle, "Found entry created by timed-out attempt");
                        return Ok(existing.handle);
                    }
                }
                self.bounded(self.router.add_hotspot_user(spec)).await
            }
        })
        .await;

        let handle = match result {
            Ok(handle) => handle,
            Err(err) => {
                metrics::record_provisioning("grant", "failure");
                self.discard_partial_grant(&key).await;
                return Err(match err {
                    RouterError::Timeout | RouterError::Unavailable(_) => {
                        warn!(error = %err, "Router unavailable during grant");
                        ProvisioningError::RouterUnavailable
                    }
                    RouterError::NotFound | RouterError::Rejected(_) => {
                        error!(error = %err, "Router rejected hotspot user");
                        ProvisioningError::ProvisioningFailed(err.to_string())
                    }
                });
            }
        };

        metrics::record_provisioning("grant", "success");
        info!(handle = %handle, network_user = %spec.name, "Network access granted");

        Ok(ProvisioningRecord {
            session_id: session_id.to_string(),
            network_user_name: spec.name,
            network_password: spec.password,
            granted_at,
            expires_at,
            router_handle: handle,
        })
    }

    /// Best-effort removal of an entry a failed grant may have left behind.
    /// Anything missed here is an orphan for the next reconciliation pass.
    async fn discard_partial_grant(&self, key: &str) {
        if let Ok(Some(entry)) = self.bounded(self.router.find_by_key(key)).await {
            match self.revoke_handle(&entry.handle).await {
                Ok(()) => info!(handle = %entry.handle, "Removed entry left by failed grant"),
                Err(e) => warn!(error = %e, "Could not remove entry left by failed grant"),
            }
        }
    }

    /// Remove the router entry behind `record`. "Not found" counts as success.
    #[instrument(skip(self, record), fields(session_id = %record.session_id, handle = %record.router_handle))]
    pub async fn revoke(&self, record: &ProvisioningRecord) -> Result<(), RevocationError> {
        let result = self.revoke_handle(&record.router_handle).await;
        if let Err(e) = &result {
            warn!(
                error = %e,
                alert = "revocation_failed",
                "Revocation failed; reconciliation will retry"
            );
            metrics::record_alert("revocation_failed");
        }
        result
    }

    async fn revoke_handle(&self, handle: &RouterHandle) -> Result<(), RevocationError> {
        match self.bounded(self.router.remove_hotspot_user(handle)).await {
            Ok(()) => {
                metrics::record_provisioning("revoke", "success");
                Ok(())
            }
            Err(RouterError::NotFound) => {
                debug!(handle = %handle, "Router entry already gone");
                metrics::record_provisioning("revoke", "not_found");
                Ok(())
            }
            Err(e) => {
                metrics::record_provisioning("revoke", "failure");
                Err(RevocationError(e.to_string()))
            }
        }
    }

    /// Bring router entries and live sessions back into a 1:1 correspondence.
    ///
    /// Sessions are snapshotted before the router is listed, so an entry
    /// granted after the snapshot is either in flight or visible in the store
    /// by the time it is examined.
    #[instrument(skip(self, sessions))]
    pub async fn reconcile(&self, sessions: &SessionStore) -> Result<ReconcileReport, ProvisioningError> {
        let snapshot = sessions.list_active();
        let entries = self
            .bounded(self.router.list_hotspot_users())
            .await
            .map_err(|e| {
                warn!(error = %e, "Reconciliation could not list router entries");
                ProvisioningError::RouterUnavailable
            })?;

        let mut report = ReconcileReport::default();
        let mut present: HashMap<RouterHandle, String> = HashMap::new();

        for entry in entries {
            let Some(session_id) = entry
                .comment
                .as_deref()
                .and_then(|c| c.strip_prefix(IDEMPOTENCY_PREFIX))
            else {
                continue;
            };

            // Read before the session table: a grant leaves the in-flight set
            // only after its session is stored.
            let in_flight = self.in_flight.contains(session_id);
            let owned = sessions
                .peek(session_id)
                .is_some_and(|s| s.provisioning.router_handle == entry.handle);
            if owned {
                present.insert(entry.handle, session_id.to_string());
                continue;
            }
            if in_flight {
                continue;
            }

            match self.revoke_handle(&entry.handle).await {
                Ok(()) => {
                    info!(handle = %entry.handle, session_id = %session_id, "Revoked orphaned router entry");
                    metrics::record_reconciliation("orphan_revoked");
                    report.orphans_revoked += 1;
                }
                Err(e) => {
                    warn!(handle = %entry.handle, error = %e, "Failed to revoke orphaned router entry");
                    report.failures += 1;
                }
            }
        }

        for session in snapshot {
            if present.contains_key(&session.provisioning.router_handle) {
                continue;
            }
            // Ended since the snapshot.
            if !sessions.contains(&session.session_id) {
                continue;
            }

            let can_reprovision = self.settings.missing_entry_policy
                == MissingEntryPolicy::Reprovision
                && !session.reprovisioned;

            if can_reprovision {
                let remaining = session.remaining(self.clock.now());
                if remaining.is_zero() {
                    continue;
                }

                let _in_flight = self.track_in_flight(&session.session_id);
                match self
                    .grant(&session.identity, &session.session_id, remaining)
                    .await
                {
                    Ok(mut record) => {
                        record.expires_at = session.expires_at;
                        if sessions.replace_record(&session.session_id, record.clone()) {
                            info!(session_id = %session.session_id, "Re-provisioned missing router entry");
                            metrics::record_reconciliation("reprovisioned");
                            report.reprovisioned += 1;
                        } else if self.revoke(&record).await.is_err() {
                            report.failures += 1;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!(session_id = %session.session_id, error = %e, "Re-provisioning failed, terminating session");
                    }
                }
            }

            if sessions.terminate(&session.session_id).await {
                info!(session_id = %session.session_id, "Terminated session with missing router entry");
                metrics::record_reconciliation("terminated");
                report.terminated += 1;
            }
        }

        Ok(report)
    }
}

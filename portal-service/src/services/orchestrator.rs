//! Authentication entry point: backend selection, fallback, provisioning and
//! session creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::FeatureFlags;
use crate::models::{AuthMethod, Credential, Session, Voucher};
use crate::services::backends::{CredentialBackend, SocialBackend, Verified};
use crate::services::clock::Clock;
use crate::services::error::{AuthError, BackendError, ProvisioningError, StoreError};
use crate::services::ledger::VoucherLedger;
use crate::services::metrics;
use crate::services::provisioning::ProvisioningCoordinator;
use crate::services::sessions::SessionStore;
use crate::utils::generate_session_id;

/// Progress of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Received,
    BackendSelected,
    Verified,
    Provisioned,
    SessionCreated,
    Rejected,
}

impl AuthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStage::Received => "received",
            AuthStage::BackendSelected => "backend_selected",
            AuthStage::Verified => "verified",
            AuthStage::Provisioned => "provisioned",
            AuthStage::SessionCreated => "session_created",
            AuthStage::Rejected => "rejected",
        }
    }
}

/// Logs stage transitions and records the final outcome.
struct AuthAttempt {
    method: AuthMethod,
    started: Instant,
}

impl AuthAttempt {
    fn received(method: AuthMethod) -> Self {
        debug!(method = method.as_str(), stage = AuthStage::Received.as_str(), "Authentication received");
        Self {
            method,
            started: Instant::now(),
        }
    }

    fn advance(&self, stage: AuthStage) {
        debug!(method = self.method.as_str(), stage = stage.as_str(), "Authentication advanced");
    }

    fn reject(&self, err: AuthError) -> AuthError {
        info!(
            method = self.method.as_str(),
            stage = AuthStage::Rejected.as_str(),
            reason = err.kind(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Authentication rejected"
        );
        metrics::record_auth_attempt(self.method.as_str(), err.kind());
        err
    }

    fn succeed(&self, session: &Session) {
        info!(
            method = self.method.as_str(),
            stage = AuthStage::SessionCreated.as_str(),
            session_id = %session.session_id,
            user_id = %session.identity.user_id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Authentication succeeded"
        );
        metrics::record_auth_attempt(self.method.as_str(), "success");
    }
}

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct PortalStats {
    pub active_sessions: usize,
    /// `None` when the router could not be queried.
    pub router_active_hosts: Option<usize>,
    pub vouchers_by_state: BTreeMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

pub struct AuthOrchestrator {
    backends: Vec<CredentialBackend>,
    ledger: Arc<VoucherLedger>,
    coordinator: Arc<ProvisioningCoordinator>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    features: FeatureFlags,
    default_ttl: Duration,
    started_at: DateTime<Utc>,
}

impl AuthOrchestrator {
    /// `backends` are tried in the given order for password credentials.
    pub fn new(
        backends: Vec<CredentialBackend>,
        ledger: Arc<VoucherLedger>,
        coordinator: Arc<ProvisioningCoordinator>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        features: FeatureFlags,
        default_ttl: Duration,
    ) -> Self {
        let started_at = clock.now();
        Self {
            backends,
            ledger,
            coordinator,
            sessions,
            clock,
            features,
            default_ttl,
            started_at,
        }
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn ledger(&self) -> &Arc<VoucherLedger> {
        &self.ledger
    }

    pub fn coordinator(&self) -> &Arc<ProvisioningCoordinator> {
        &self.coordinator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn social(&self) -> Option<&SocialBackend> {
        self.backends.iter().find_map(CredentialBackend::as_social)
    }

    fn check_enabled(&self, method: AuthMethod) -> Result<(), AuthError> {
        let enabled = match method {
            AuthMethod::Password => true,
            AuthMethod::Voucher => self.features.voucher_enabled,
            AuthMethod::Social => self.features.social_login_enabled,
        };
        if enabled {
            Ok(())
        } else {
            Err(AuthError::MethodDisabled(method))
        }
    }

    /// Verify `credential`, grant network access and open a session.
    pub async fn authenticate(&self, credential: Credential) -> Result<Session, AuthError> {
        let method = credential.method();
        let attempt = AuthAttempt::received(method);

        let verified = self
            .verify(&credential, &attempt)
            .await
            .map_err(|e| attempt.reject(e))?;
        attempt.advance(AuthStage::Verified);

        let session = self
            .open_session(method, verified, &attempt)
            .await
            .map_err(|e| attempt.reject(e))?;

        attempt.succeed(&session);
        Ok(session)
    }

    async fn verify(&self, credential: &Credential, attempt: &AuthAttempt) -> Result<Verified, AuthError> {
        let method = credential.method();
        self.check_enabled(method)?;

        let candidates: Vec<&CredentialBackend> = self
            .backends
            .iter()
            .filter(|b| b.method() == method)
            .collect();
        if candidates.is_empty() {
            return Err(AuthError::MethodDisabled(method));
        }
        attempt.advance(AuthStage::BackendSelected);

        if method != AuthMethod::Password {
            // Vouchers and social logins have exactly one authority.
            return candidates[0].verify(credential).await.map_err(AuthError::from);
        }

        let mut failures = Vec::with_capacity(candidates.len());
        for backend in candidates {
            match backend.verify(credential).await {
                Ok(verified) => {
                    debug!(backend = backend.kind().as_str(), "Credential verified");
                    return Ok(verified);
                }
                Err(err) => {
                    debug!(backend = backend.kind().as_str(), error = %err, "Backend declined, trying next");
                    failures.push(err);
                }
            }
        }

        Err(most_specific_failure(&failures))
    }

    /// Provision and record the session on a detached task so a client
    /// disconnect cannot strand a grant or a spent voucher.
    async fn open_session(
        &self,
        method: AuthMethod,
        verified: Verified,
        attempt: &AuthAttempt,
    ) -> Result<Session, AuthError> {
        let coordinator = Arc::clone(&self.coordinator);
        let sessions = Arc::clone(&self.sessions);
        let ttl = verified.session_ttl.unwrap_or(self.default_ttl);
        let identity = verified.identity;
        let session_id = generate_session_id();

        let task = tokio::spawn(async move {
            let _in_flight = coordinator.track_in_flight(&session_id);
            let record = coordinator.grant(&identity, &session_id, ttl).await?;
            match sessions.create(identity, record.clone(), ttl) {
                Ok(session) => Ok(session),
                Err(err) => {
                    // Failure is logged by the coordinator; reconciliation retries.
                    let _ = coordinator.revoke(&record).await;
                    Err(ProvisioningError::ProvisioningFailed(err.to_string()))
                }
            }
        });

        match task.await {
            Ok(Ok(session)) => {
                attempt.advance(AuthStage::Provisioned);
                Ok(session)
            }
            Ok(Err(err)) if method == AuthMethod::Voucher => {
                // The voucher spend is final once billing confirmed it.
                error!(
                    alert = "provisioning_failed_after_spend",
                    error = %err,
                    "Voucher redeemed but network access could not be granted"
                );
                metrics::record_alert("provisioning_failed_after_spend");
                Err(AuthError::ProvisioningFailed)
            }
            Ok(Err(err)) => Err(err.into()),
            Err(join_err) => {
                error!(error = %join_err, alert = "provisioning_task_failed", "Provisioning task failed");
                metrics::record_alert("provisioning_task_failed");
                Err(AuthError::ProvisioningFailed)
            }
        }
    }

    /// End a session. Unknown sessions are ignored.
    pub async fn logout(&self, session_id: &str) {
        if self.sessions.terminate(session_id).await {
            info!("User logged out");
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, AuthError> {
        Ok(self.sessions.get(session_id).await?)
    }

    pub fn list_active_sessions(&self) -> Vec<Session> {
        self.sessions.list_active()
    }

    pub async fn list_vouchers(&self) -> Result<Vec<Voucher>, StoreError> {
        self.ledger.list_vouchers().await
    }

    pub async fn generate_vouchers(
        &self,
        count: usize,
        duration: Duration,
        value: Decimal,
    ) -> Result<Vec<Voucher>, StoreError> {
        self.ledger.generate_vouchers(count, duration, value).await
    }

    pub async fn stats(&self) -> Result<PortalStats, StoreError> {
        let router_active_hosts = match self.coordinator.router().list_active_hosts().await {
            Ok(hosts) => Some(hosts.len()),
            Err(e) => {
                warn!(error = %e, "Could not query router active hosts");
                None
            }
        };

        let vouchers_by_state = self
            .ledger
            .counts_by_state()
            .await?
            .into_iter()
            .map(|(state, count)| (state.as_str().to_string(), count))
            .collect();

        let now = self.clock.now();
        Ok(PortalStats {
            active_sessions: self.sessions.list_active().len(),
            router_active_hosts,
            vouchers_by_state,
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
        })
    }
}

/// Pick the error to surface after every password backend declined:
/// a definite rejection wins over an outage.
fn most_specific_failure(failures: &[BackendError]) -> AuthError {
    if failures
        .iter()
        .any(|e| matches!(e, BackendError::InvalidCredential))
    {
        return AuthError::InvalidCredential;
    }
    failures
        .first()
        .cloned()
        .map(AuthError::from)
        .unwrap_or(AuthError::BackendUnavailable)
}

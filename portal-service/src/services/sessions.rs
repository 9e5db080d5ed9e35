//! In-memory session table. Ending a session always revokes its grant.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::models::{Identity, ProvisioningRecord, Session};
use crate::services::clock::{checked_offset, Clock};
use crate::services::error::SessionError;
use crate::services::metrics;
use crate::services::provisioning::ProvisioningCoordinator;

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    coordinator: Arc<ProvisioningCoordinator>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(coordinator: Arc<ProvisioningCoordinator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            coordinator,
            clock,
        }
    }

    /// Store a session for `record`. Expiry is anchored at the grant time so
    /// the session and its router entry expire together.
    pub fn create(
        &self,
        identity: Identity,
        mut record: ProvisioningRecord,
        ttl: Duration,
    ) -> Result<Session, SessionError> {
        let created_at = record.granted_at;
        let expires_at =
            checked_offset(created_at, ttl).ok_or(SessionError::ExpiryOutOfRange)?;
        record.expires_at = expires_at;

        let session = Session {
            session_id: record.session_id.clone(),
            identity,
            created_at,
            expires_at,
            provisioning: record,
            reprovisioned: false,
        };

        self.sessions
            .insert(session.session_id.clone(), session.clone());
        self.update_gauge();

        info!(
            session_id = %session.session_id,
            user_id = %session.identity.user_id,
            expires_at = %session.expires_at,
            "Session created"
        );

        Ok(session)
    }

    /// Look up a live session. An expired one is evicted and revoked.
    pub async fn get(&self, session_id: &str) -> Result<Session, SessionError> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or(SessionError::SessionNotFound)?;

        if !session.is_expired(now) {
            return Ok(session);
        }

        if let Some((_, expired)) = self
            .sessions
            .remove_if(session_id, |_, s| s.is_expired(now))
        {
            info!(session_id = %session_id, "Evicted expired session on access");
            self.update_gauge();
            // Failure is logged by the coordinator; reconciliation retries.
            let _ = self.coordinator.revoke(&expired.provisioning).await;
        }
        Err(SessionError::SessionExpired)
    }

    /// Read without expiry enforcement.
    pub fn peek(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// End a session. Unknown or already-ended sessions are a no-op; otherwise
    /// the grant is revoked exactly once. Returns whether a session was ended.
    #[instrument(skip(self))]
    pub async fn terminate(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return false;
        };
        self.update_gauge();

        let _ = self.coordinator.revoke(&session.provisioning).await;
        info!(user_id = %session.identity.user_id, "Session terminated");
        true
    }

    /// Remove and revoke every expired session. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_expired(now))
            .map(|s| s.key().clone())
            .collect();

        let mut swept = 0;
        for session_id in expired {
            // Re-checked under the entry lock; a concurrent logout wins.
            if let Some((_, session)) = self.sessions.remove_if(&session_id, |_, s| s.is_expired(now)) {
                let _ = self.coordinator.revoke(&session.provisioning).await;
                swept += 1;
            }
        }

        if swept > 0 {
            self.update_gauge();
            info!(count = swept, "Swept expired sessions");
        }
        swept
    }

    /// Swap in a re-created grant. The record keeps the session's expiry.
    /// Returns false if the session is gone.
    pub fn replace_record(&self, session_id: &str, mut record: ProvisioningRecord) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut session) => {
                record.expires_at = session.expires_at;
                session.provisioning = record;
                session.reprovisioned = true;
                true
            }
            None => false,
        }
    }

    /// Sessions that have not yet expired, newest first.
    pub fn list_active(&self) -> Vec<Session> {
        let now = self.clock.now();
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn update_gauge(&self) {
        metrics::ACTIVE_SESSIONS.set(self.sessions.len() as i64);
    }
}

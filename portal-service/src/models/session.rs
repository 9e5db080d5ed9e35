//! Sessions and the router-side grants they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Identity;

/// Opaque identifier returned by the router for a hotspot entry; required to
/// remove the entry again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouterHandle(pub String);

impl RouterHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live network grant on the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisioningRecord {
    pub session_id: String,
    pub network_user_name: String,
    #[serde(skip_serializing)]
    pub network_password: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub router_handle: RouterHandle,
}

/// An authenticated portal session. Owns exactly one provisioning record and
/// always expires together with it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub session_id: String,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub provisioning: ProvisioningRecord,
    /// Set once reconciliation has re-created a lost router entry.
    #[serde(skip)]
    pub reprovisioned: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }
}

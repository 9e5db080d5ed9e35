//! Credential verification backends.
//!
//! The set of backends is closed: each variant of [`CredentialBackend`]
//! answers for one credential shape and never touches session or router state.

mod local;
mod radius;
mod social;
mod voucher;

pub use local::{InMemoryUserStore, LocalBackend, PgUserStore, UserStore};
pub use radius::{
    MockRadius, RadiusBackend, RadiusExchange, RadiusOutcome, RadiusSettings, UdpRadiusClient,
};
pub use social::{
    MockSocialProvider, OAuthProvider, SocialBackend, SocialProfile, SocialProvider,
};
pub use voucher::VoucherBackend;

use std::time::Duration;

use crate::models::{AuthMethod, Credential, Identity};
use crate::services::error::BackendError;

/// A successful verification.
#[derive(Debug, Clone)]
pub struct Verified {
    pub identity: Identity,
    /// Access duration dictated by the backend (voucher grant, RADIUS
    /// Session-Timeout). `None` means the portal default.
    pub session_ttl: Option<Duration>,
}

impl Verified {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            session_ttl: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Radius,
    Social,
    Voucher,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Radius => "radius",
            BackendKind::Social => "social",
            BackendKind::Voucher => "voucher",
        }
    }
}

pub enum CredentialBackend {
    Local(LocalBackend),
    Radius(RadiusBackend),
    Social(SocialBackend),
    Voucher(VoucherBackend),
}

impl CredentialBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            CredentialBackend::Local(_) => BackendKind::Local,
            CredentialBackend::Radius(_) => BackendKind::Radius,
            CredentialBackend::Social(_) => BackendKind::Social,
            CredentialBackend::Voucher(_) => BackendKind::Voucher,
        }
    }

    /// Which credential shape this backend verifies.
    pub fn method(&self) -> AuthMethod {
        match self {
            CredentialBackend::Local(_) | CredentialBackend::Radius(_) => AuthMethod::Password,
            CredentialBackend::Social(_) => AuthMethod::Social,
            CredentialBackend::Voucher(_) => AuthMethod::Voucher,
        }
    }

    pub async fn verify(&self, credential: &Credential) -> Result<Verified, BackendError> {
        match (self, credential) {
            (
                CredentialBackend::Local(backend),
                Credential::Password { username, password },
            ) => backend.verify(username, password).await,
            (
                CredentialBackend::Radius(backend),
                Credential::Password { username, password },
            ) => backend.verify(username, password).await,
            (CredentialBackend::Social(backend), Credential::Social { provider, token }) => {
                backend.verify(provider, token).await
            }
            (CredentialBackend::Voucher(backend), Credential::Voucher { code }) => {
                backend.verify(code).await
            }
            _ => Err(BackendError::InvalidCredential),
        }
    }

    pub fn as_social(&self) -> Option<&SocialBackend> {
        match self {
            CredentialBackend::Social(backend) => Some(backend),
            _ => None,
        }
    }
}

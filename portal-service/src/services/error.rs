//! Error kinds for each portal component and their translation into the
//! orchestrator-facing [`AuthError`] and the HTTP-facing [`AppError`].

use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

use crate::models::AuthMethod;

/// Failures of a credential backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend timed out")]
    Timeout,

    #[error("Unsupported social provider: {0}")]
    UnsupportedProvider(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Failures of a voucher redemption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Voucher not found")]
    VoucherNotFound,

    #[error("Voucher already used")]
    VoucherAlreadyUsed,

    #[error("Voucher expired")]
    VoucherExpired,

    #[error("Voucher ledger unavailable")]
    LedgerUnavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Router unavailable")]
    RouterUnavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Revocation failed: {0}")]
pub struct RevocationError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Session lifetime out of range")]
    ExpiryOutOfRange,
}

/// Outcome of asking the billing system of record to consume a voucher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("Billing rejected voucher: {0}")]
    Rejected(String),

    #[error("Billing unavailable: {0}")]
    Unavailable(String),

    #[error("Billing request timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("Router entry not found")]
    NotFound,

    #[error("Router request timed out")]
    Timeout,

    #[error("Router unavailable: {0}")]
    Unavailable(String),

    #[error("Router rejected request: {0}")]
    Rejected(String),
}

impl Retryable for RouterError {
    fn is_retryable(&self) -> bool {
        matches!(self, RouterError::Timeout)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadiusError {
    #[error("RADIUS server did not answer")]
    Timeout,

    #[error("RADIUS transport error: {0}")]
    Transport(String),

    #[error("RADIUS protocol error: {0}")]
    Protocol(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocialError {
    #[error("Provider rejected the authorization: {0}")]
    Rejected(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider request timed out")]
    Timeout,
}

/// Persistence failures of the voucher and user stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate key: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// The failure taxonomy surfaced by `AuthOrchestrator`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Authentication backend unavailable")]
    BackendUnavailable,

    #[error("Voucher ledger unavailable")]
    LedgerUnavailable,

    #[error("Router unavailable")]
    RouterUnavailable,

    #[error("Voucher already used")]
    VoucherAlreadyUsed,

    #[error("Voucher expired")]
    VoucherExpired,

    #[error("Voucher not found")]
    VoucherNotFound,

    #[error("Provisioning failed")]
    ProvisioningFailed,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Authentication method disabled: {}", .0.as_str())]
    MethodDisabled(AuthMethod),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

impl AuthError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::BackendUnavailable => "backend_unavailable",
            AuthError::LedgerUnavailable => "ledger_unavailable",
            AuthError::RouterUnavailable => "router_unavailable",
            AuthError::VoucherAlreadyUsed => "voucher_already_used",
            AuthError::VoucherExpired => "voucher_expired",
            AuthError::VoucherNotFound => "voucher_not_found",
            AuthError::ProvisioningFailed => "provisioning_failed",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionExpired => "session_expired",
            AuthError::MethodDisabled(_) => "method_disabled",
            AuthError::UnsupportedProvider(_) => "unsupported_provider",
        }
    }
}

impl From<LedgerError> for AuthError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::VoucherNotFound => AuthError::VoucherNotFound,
            LedgerError::VoucherAlreadyUsed => AuthError::VoucherAlreadyUsed,
            LedgerError::VoucherExpired => AuthError::VoucherExpired,
            LedgerError::LedgerUnavailable => AuthError::LedgerUnavailable,
        }
    }
}

impl From<BackendError> for AuthError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidCredential => AuthError::InvalidCredential,
            BackendError::Unavailable(_) | BackendError::Timeout => AuthError::BackendUnavailable,
            BackendError::UnsupportedProvider(p) => AuthError::UnsupportedProvider(p),
            BackendError::Ledger(e) => e.into(),
        }
    }
}

impl From<ProvisioningError> for AuthError {
    fn from(err: ProvisioningError) -> Self {
        match err {
            ProvisioningError::ProvisioningFailed(_) => AuthError::ProvisioningFailed,
            ProvisioningError::RouterUnavailable => AuthError::RouterUnavailable,
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound => AuthError::SessionNotFound,
            SessionError::SessionExpired => AuthError::SessionExpired,
            SessionError::ExpiryOutOfRange => AuthError::ProvisioningFailed,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err {
            AuthError::InvalidCredential
            | AuthError::SessionNotFound
            | AuthError::SessionExpired => AppError::Unauthorized(message),
            AuthError::BackendUnavailable
            | AuthError::LedgerUnavailable
            | AuthError::RouterUnavailable => AppError::ServiceUnavailable(err.to_string()),
            AuthError::VoucherAlreadyUsed
            | AuthError::VoucherExpired
            | AuthError::MethodDisabled(_) => AppError::Forbidden(message),
            AuthError::VoucherNotFound => AppError::NotFound(message),
            AuthError::UnsupportedProvider(_) => AppError::BadRequest(message),
            AuthError::ProvisioningFailed => AppError::InternalError(message),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::DatabaseError(e.into()),
            StoreError::Conflict(key) => {
                AppError::Conflict(anyhow::anyhow!("Duplicate key: {}", key))
            }
            StoreError::Corrupt(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}

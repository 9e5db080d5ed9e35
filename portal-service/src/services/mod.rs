//! Services layer for portal-service.
//!
//! The five core components (credential backends, voucher ledger,
//! provisioning coordinator, session store and auth orchestrator) plus the
//! adapters for the router, billing system, RADIUS server and social
//! providers they talk to.

pub mod backends;
pub mod billing;
pub mod clock;
mod database;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod provisioning;
pub mod router;
pub mod sessions;
pub mod voucher_store;
pub mod workers;

pub use backends::{BackendKind, CredentialBackend, Verified};
pub use billing::{BillingConfirmation, BillingSystem, MockBilling, MockBillingBehavior, NuxBillClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use database::Database;
pub use error::{
    AuthError, BackendError, BillingError, LedgerError, ProvisioningError, RadiusError,
    RevocationError, RouterError, SessionError, SocialError, StoreError,
};
pub use ledger::{LedgerSettings, Redemption, VoucherLedger};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{AuthOrchestrator, AuthStage, PortalStats};
pub use provisioning::{ProvisioningCoordinator, ProvisioningSettings, ReconcileReport};
pub use router::{HotspotRouter, MockAddBehavior, MockRouter, RouterOsClient};
pub use sessions::SessionStore;
pub use voucher_store::{InMemoryVoucherStore, PgVoucherStore, ReserveOutcome, VoucherStore};
pub use workers::{BackgroundWorkers, WorkerIntervals};

//! Voucher redemption with at-most-once semantics.
//!
//! The local `Reserved` state is a short-lived mutual-exclusion lock; billing
//! stays the authority on whether a voucher is spent.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::models::{Identity, Voucher, VoucherState};
use crate::services::billing::{BillingConfirmation, BillingSystem};
use crate::services::clock::{checked_offset_back, Clock};
use crate::services::error::{BillingError, LedgerError, StoreError};
use crate::services::metrics;
use crate::services::voucher_store::{ReserveOutcome, VoucherStore};
use crate::utils::{generate_reservation_id, generate_voucher_code};

/// A confirmed redemption: who redeemed and how much access it buys.
#[derive(Debug, Clone)]
pub struct Redemption {
    pub identity: Identity,
    pub duration: Duration,
    pub voucher: Voucher,
}

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub billing_timeout: Duration,
    pub reservation_timeout: Duration,
    pub code_length: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            billing_timeout: Duration::from_secs(5),
            reservation_timeout: Duration::from_secs(60),
            code_length: 8,
        }
    }
}

pub struct VoucherLedger {
    store: Arc<dyn VoucherStore>,
    billing: Arc<dyn BillingSystem>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

impl VoucherLedger {
    pub fn new(
        store: Arc<dyn VoucherStore>,
        billing: Arc<dyn BillingSystem>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            store,
            billing,
            clock,
            settings,
        }
    }

    /// Redeem `code` once.
    ///
    /// The redemption runs on its own task: dropping the returned future (for
    /// example when the client disconnects) does not interrupt it, so a
    /// reservation always reaches `Redeemed` or is rolled back.
    pub async fn redeem(self: &Arc<Self>, code: &str) -> Result<Redemption, LedgerError> {
        let ledger = Arc::clone(self);
        let code = Voucher::normalize_code(code);

        let outcome = tokio::spawn(async move { ledger.redeem_detached(&code).await }).await;

        let result = outcome.unwrap_or_else(|e| {
            error!(error = %e, alert = "redemption_task_failed", "Voucher redemption task failed");
            metrics::record_alert("redemption_task_failed");
            Err(LedgerError::LedgerUnavailable)
        });

        metrics::record_voucher_redemption(match &result {
            Ok(_) => "success",
            Err(LedgerError::VoucherNotFound) => "not_found",
            Err(LedgerError::VoucherAlreadyUsed) => "already_used",
            Err(LedgerError::VoucherExpired) => "expired",
            Err(LedgerError::LedgerUnavailable) => "unavailable",
        });

        result
    }

    #[instrument(skip(self), fields(code = %code))]
    async fn redeem_detached(&self, code: &str) -> Result<Redemption, LedgerError> {
        if code.is_empty() {
            return Err(LedgerError::VoucherNotFound);
        }

        let reservation_id = generate_reservation_id();
        let reserved = match self
            .store
            .try_reserve(code, &reservation_id, self.clock.now())
            .await
            .map_err(|e| self.store_failure("reserve", e))?
        {
            ReserveOutcome::Reserved(voucher) => voucher,
            ReserveOutcome::NotFound => return Err(LedgerError::VoucherNotFound),
            ReserveOutcome::AlreadyUsed => return Err(LedgerError::VoucherAlreadyUsed),
            ReserveOutcome::Expired => return Err(LedgerError::VoucherExpired),
        };

        info!("Voucher reserved, confirming with billing");

        let billing = tokio::time::timeout(
            self.settings.billing_timeout,
            self.billing.consume_voucher(code),
        )
        .await
        .unwrap_or(Err(BillingError::Timeout));

        let confirmation = match billing {
            Ok(confirmation) => confirmation,
            Err(err) => {
                self.roll_back(code, &reservation_id).await;
                return Err(match err {
                    BillingError::Rejected(reason) => {
                        info!(reason = %reason, "Billing rejected voucher");
                        LedgerError::VoucherExpired
                    }
                    BillingError::Timeout | BillingError::Unavailable(_) => {
                        warn!(error = %err, "Billing confirmation failed");
                        LedgerError::LedgerUnavailable
                    }
                });
            }
        };

        let voucher = match self
            .store
            .complete_redemption(code, &reservation_id, self.clock.now())
            .await
        {
            Ok(Some(voucher)) => voucher,
            Ok(None) => {
                // The reservation was reclaimed and may now belong to another
                // attempt; only the current holder may grant access.
                error!(
                    alert = "reservation_lost",
                    "Billing confirmed a voucher whose reservation was already released"
                );
                metrics::record_alert("reservation_lost");
                return Err(LedgerError::VoucherAlreadyUsed);
            }
            Err(e) => {
                error!(
                    alert = "redemption_not_recorded",
                    error = %e,
                    "Billing confirmed voucher but local state could not be updated"
                );
                metrics::record_alert("redemption_not_recorded");
                reserved
            }
        };

        info!(uses_remaining = voucher.uses_remaining, "Voucher redeemed");

        Ok(Redemption {
            identity: voucher_identity(code, &confirmation),
            duration: voucher.duration(),
            voucher,
        })
    }

    async fn roll_back(&self, code: &str, reservation_id: &str) {
        match self.store.release_reservation(code, reservation_id).await {
            Ok(true) => info!(code = %code, "Voucher reservation rolled back"),
            Ok(false) => warn!(code = %code, "Voucher was no longer reserved during rollback"),
            Err(e) => {
                // The janitor reclaims it after the reservation timeout.
                error!(
                    code = %code,
                    error = %e,
                    alert = "rollback_failed",
                    "Failed to roll back voucher reservation"
                );
                metrics::record_alert("rollback_failed");
            }
        }
    }

    fn store_failure(&self, operation: &str, err: StoreError) -> LedgerError {
        error!(operation = operation, error = %err, "Voucher store failure");
        LedgerError::LedgerUnavailable
    }

    /// Return reservations older than the reservation timeout to `Unused`.
    pub async fn release_stale_reservations(&self) -> Result<usize, StoreError> {
        match checked_offset_back(self.clock.now(), self.settings.reservation_timeout) {
            Some(cutoff) => self.release_reserved_before(cutoff).await,
            None => Ok(0),
        }
    }

    /// Return every reservation to `Unused`. Used at startup, when no
    /// redemption can still be in flight.
    pub async fn release_all_reservations(&self) -> Result<usize, StoreError> {
        self.release_reserved_before(self.clock.now()).await
    }

    async fn release_reserved_before(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let released = self.store.release_stale_reservations(cutoff).await?;
        for code in &released {
            warn!(
                code = %code,
                alert = "stale_reservation",
                "Reclaimed stuck voucher reservation"
            );
            metrics::record_alert("stale_reservation");
        }
        Ok(released.len())
    }

    /// Create `count` fresh single-use vouchers.
    #[instrument(skip(self))]
    pub async fn generate_vouchers(
        &self,
        count: usize,
        duration: Duration,
        value: Decimal,
    ) -> Result<Vec<Voucher>, StoreError> {
        const ATTEMPTS: usize = 3;

        let mut last_err = None;
        for _ in 0..ATTEMPTS {
            let now = self.clock.now();
            let mut codes = HashSet::with_capacity(count);
            while codes.len() < count {
                codes.insert(generate_voucher_code(self.settings.code_length));
            }
            let vouchers: Vec<Voucher> = codes
                .iter()
                .map(|code| Voucher::new(code, duration, value, now))
                .collect();

            match self.store.insert_many(&vouchers).await {
                Ok(()) => {
                    info!(count = vouchers.len(), "Vouchers generated");
                    return Ok(vouchers);
                }
                Err(StoreError::Conflict(code)) => {
                    warn!(code = %code, "Generated voucher code collided, regenerating batch");
                    last_err = Some(StoreError::Conflict(code));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Conflict("voucher batch".to_string())))
    }

    pub async fn list_vouchers(&self) -> Result<Vec<Voucher>, StoreError> {
        self.store.list().await
    }

    pub async fn counts_by_state(&self) -> Result<HashMap<VoucherState, u64>, StoreError> {
        self.store.count_by_state().await
    }

    pub async fn health_check(&self) -> Result<(), BillingError> {
        self.billing.health_check().await
    }
}

fn voucher_identity(code: &str, confirmation: &BillingConfirmation) -> Identity {
    let user_id = match &confirmation.customer_id {
        Some(customer) => format!("voucher:{}", customer),
        None => format!("voucher:{}", code),
    };
    let display_name = confirmation
        .customer_name
        .clone()
        .unwrap_or_else(|| format!("Voucher {}", code));
    Identity::guest(user_id, display_name)
}

use std::sync::Arc;

use super::Verified;
use crate::services::error::BackendError;
use crate::services::ledger::VoucherLedger;

/// Delegates to the ledger; the redemption itself is the verification.
pub struct VoucherBackend {
    ledger: Arc<VoucherLedger>,
}

impl VoucherBackend {
    pub fn new(ledger: Arc<VoucherLedger>) -> Self {
        Self { ledger }
    }

    pub async fn verify(&self, code: &str) -> Result<Verified, BackendError> {
        let redemption = self.ledger.redeem(code).await?;
        Ok(Verified {
            identity: redemption.identity,
            session_ttl: Some(redemption.duration),
        })
    }
}

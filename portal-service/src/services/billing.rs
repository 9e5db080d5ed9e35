//! Billing system of record: the durable authority on whether a voucher has
//! been spent.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::BillingConfig;
use crate::services::error::BillingError;

/// Customer details returned when billing accepts a voucher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingConfirmation {
    pub customer_id: Option<String>,
    pub customer_name: Option<String>,
}

#[async_trait]
pub trait BillingSystem: Send + Sync {
    /// Confirm and consume `code` server-side.
    async fn consume_voucher(&self, code: &str) -> Result<BillingConfirmation, BillingError>;

    async fn health_check(&self) -> Result<(), BillingError>;
}

/// NuxBill/PHPNuxBill voucher API client.
pub struct NuxBillClient {
    base_url: String,
    api_key: Secret<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    customer_id: Option<serde_json::Value>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl NuxBillClient {
    pub fn new(config: &BillingConfig) -> Result<Self, BillingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BillingError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn map_transport(e: reqwest::Error) -> BillingError {
        if e.is_timeout() {
            BillingError::Timeout
        } else {
            BillingError::Unavailable(format!("Failed to reach billing: {}", e))
        }
    }
}

#[async_trait]
impl BillingSystem for NuxBillClient {
    async fn consume_voucher(&self, code: &str) -> Result<BillingConfirmation, BillingError> {
        let url = format!("{}/api/voucher/validate", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("voucher", code), ("api_key", self.api_key.expose_secret().as_str())])
            .send()
            .await
            .map_err(Self::map_transport)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(BillingError::Unavailable(format!(
                "Billing returned error status {}",
                status
            )));
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(BillingError::Rejected(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(BillingError::Unavailable(format!(
                "Unexpected billing status {}",
                status
            )));
        }

        let body: ValidateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                BillingError::Timeout
            } else {
                BillingError::Unavailable(format!("Failed to parse billing response: {}", e))
            }
        })?;

        if !body.valid {
            return Err(BillingError::Rejected(
                body.message.unwrap_or_else(|| "voucher not valid".to_string()),
            ));
        }

        Ok(BillingConfirmation {
            customer_id: body.customer_id.map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            customer_name: body.customer_name,
        })
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(Self::map_transport)?;

        if response.status().is_server_error() {
            return Err(BillingError::Unavailable(format!(
                "Billing returned error status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Scripted billing response for [`MockBilling`].
#[derive(Debug, Clone)]
pub enum MockBillingBehavior {
    Confirm,
    Reject,
    Unavailable,
    /// Sleep for the given duration before confirming.
    Hang(Duration),
}

/// Mock billing system for testing.
///
/// Codes confirm by default; per-code scripts are consumed front to back and
/// fall back to the default once exhausted.
pub struct MockBilling {
    scripts: Mutex<HashMap<String, VecDeque<MockBillingBehavior>>>,
    calls: AtomicU64,
}

impl MockBilling {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn script(&self, code: &str, behaviors: impl IntoIterator<Item = MockBillingBehavior>) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(code.to_string())
            .or_default()
            .extend(behaviors);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, code: &str) -> MockBillingBehavior {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(code)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(MockBillingBehavior::Confirm)
    }
}

impl Default for MockBilling {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingSystem for MockBilling {
    async fn consume_voucher(&self, code: &str) -> Result<BillingConfirmation, BillingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.next_behavior(code) {
            MockBillingBehavior::Confirm => {}
            MockBillingBehavior::Reject => {
                return Err(BillingError::Rejected("[MOCK] voucher rejected".to_string()))
            }
            MockBillingBehavior::Unavailable => {
                return Err(BillingError::Unavailable("[MOCK] billing down".to_string()))
            }
            MockBillingBehavior::Hang(delay) => tokio::time::sleep(delay).await,
        }

        tracing::info!(code = %code, "[MOCK] Voucher consumed");

        Ok(BillingConfirmation {
            customer_id: Some(format!("cust-{}", code.to_lowercase())),
            customer_name: None,
        })
    }

    async fn health_check(&self) -> Result<(), BillingError> {
        Ok(())
    }
}

use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub router: RouterConfig,
    pub billing: BillingConfig,
    #[serde(default)]
    pub radius: Option<RadiusConfig>,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub voucher: VoucherConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Local admin account created at startup when absent.
    #[serde(default)]
    pub admin: Option<AdminBootstrapConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: default_service_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub base_url: String,
    pub username: String,
    pub password: Secret<String>,
    #[serde(default = "default_hotspot_profile")]
    pub profile: String,
    #[serde(default = "default_external_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    #[serde(default = "default_external_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RadiusConfig {
    pub server: String,
    #[serde(default = "default_radius_port")]
    pub port: u16,
    pub secret: Secret<String>,
    #[serde(default = "default_nas_identifier")]
    pub nas_identifier: String,
    #[serde(default = "default_external_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_radius_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminBootstrapConfig {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocialConfig {
    #[serde(default)]
    pub providers: Vec<SocialProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocialProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_uri: String,
    #[serde(default = "default_social_scope")]
    pub scope: String,
    #[serde(default = "default_external_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cookie_name: default_cookie_name(),
            cookie_secure: true,
        }
    }
}

/// What reconciliation does with a live session whose router entry vanished.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingEntryPolicy {
    #[default]
    Reprovision,
    Terminate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub missing_entry_policy: MissingEntryPolicy,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            missing_entry_policy: MissingEntryPolicy::default(),
        }
    }
}

/// Minimum headroom between the billing timeout and the reservation timeout.
pub const RESERVATION_MARGIN_SECS: u64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct VoucherConfig {
    #[serde(default = "default_reservation_timeout_secs")]
    pub reservation_timeout_secs: u64,
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

impl Default for VoucherConfig {
    fn default() -> Self {
        Self {
            reservation_timeout_secs: default_reservation_timeout_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
            code_length: default_code_length(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub voucher_enabled: bool,
    #[serde(default)]
    pub social_login_enabled: bool,
    #[serde(default)]
    pub terms_conditions_enabled: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            voucher_enabled: true,
            social_login_enabled: false,
            terms_conditions_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_auth_attempts")]
    pub auth_attempts: u32,
    #[serde(default = "default_auth_window_secs")]
    pub auth_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_attempts: default_auth_attempts(),
            auth_window_secs: default_auth_window_secs(),
        }
    }
}

fn default_service_name() -> String {
    "portal-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_hotspot_profile() -> String {
    "default".to_string()
}

fn default_external_timeout_secs() -> u64 {
    5
}

fn default_radius_port() -> u16 {
    1812
}

fn default_nas_identifier() -> String {
    "portal".to_string()
}

fn default_radius_retries() -> u32 {
    1
}

fn default_social_scope() -> String {
    "openid email profile".to_string()
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_cookie_name() -> String {
    "portal_session".to_string()
}

fn default_reconcile_interval_secs() -> u64 {
    120
}

fn default_reservation_timeout_secs() -> u64 {
    60
}

fn default_janitor_interval_secs() -> u64 {
    30
}

fn default_code_length() -> usize {
    8
}

fn default_auth_attempts() -> u32 {
    10
}

fn default_auth_window_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl PortalConfig {
    /// Load from `.env`, `portal.{yaml,toml,json}` and `PORTAL__*` variables.
    pub fn load() -> Result<Self, AppError> {
        let config: PortalConfig = core_config::load_layered("portal", "PORTAL")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: &str| Err(AppError::ConfigError(anyhow::anyhow!(msg.to_string())));

        if self.router.base_url.trim().is_empty() {
            return invalid("router.base_url must not be empty");
        }
        if self.billing.base_url.trim().is_empty() {
            return invalid("billing.base_url must not be empty");
        }
        if self.router.timeout_secs == 0 || self.billing.timeout_secs == 0 {
            return invalid("external call timeouts must be positive");
        }
        if let Some(radius) = &self.radius {
            if radius.timeout_secs == 0 {
                return invalid("radius.timeout_secs must be positive");
            }
        }
        if self.session.default_ttl_secs == 0 || self.session.sweep_interval_secs == 0 {
            return invalid("session ttl and sweep interval must be positive");
        }
        if self.session.sweep_interval_secs > self.session.default_ttl_secs {
            return invalid("session.sweep_interval_secs must not exceed session.default_ttl_secs");
        }
        if self.provisioning.reconcile_interval_secs == 0 {
            return invalid("provisioning.reconcile_interval_secs must be positive");
        }
        if self.voucher.reservation_timeout_secs == 0 || self.voucher.janitor_interval_secs == 0 {
            return invalid("voucher reservation timeout and janitor interval must be positive");
        }
        // A reservation must outlive the billing call that holds it.
        if self.voucher.reservation_timeout_secs
            < self.billing.timeout_secs.saturating_add(RESERVATION_MARGIN_SECS)
        {
            return invalid(
                "voucher.reservation_timeout_secs must exceed billing.timeout_secs by at least 5",
            );
        }
        if let Some(admin) = &self.admin {
            if admin.username.trim().is_empty() {
                return invalid("admin.username must not be empty");
            }
        }
        if self.voucher.code_length < 4 {
            return invalid("voucher.code_length must be at least 4");
        }
        Ok(())
    }

    pub fn default_session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.provisioning.reconcile_interval_secs)
    }

    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.voucher.reservation_timeout_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.voucher.janitor_interval_secs)
    }
}

//! Shared harness for portal-service integration tests.
//!
//! Wires the real core components against in-memory stores and the library's
//! mock adapters, with a manual clock.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use portal_service::{
    build_router,
    config::PortalConfig,
    models::{LocalUser, Voucher, VoucherState},
    services::{
        backends::{
            InMemoryUserStore, MockRadius, MockSocialProvider, RadiusExchange, SocialProfile,
            SocialProvider, UserStore,
        },
        AuthOrchestrator, BackgroundWorkers, Clock, InMemoryVoucherStore, ManualClock,
        MockBilling, MockRouter, VoucherStore,
    },
    startup::{assemble, Adapters},
    utils::{hash_password, Password},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::json;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::Arc;
use std::time::Duration;

pub const SOCIAL_PROVIDER: &str = "google";
pub const SOCIAL_CODE: &str = "good-code";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Configuration with every login method enabled and one-second external timeouts.
pub fn test_config() -> PortalConfig {
    test_config_with(json!({}))
}

/// `test_config` with top-level sections replaced by those in `overrides`.
pub fn test_config_with(overrides: serde_json::Value) -> PortalConfig {
    let mut base = json!({
        "router": {
            "base_url": "http://router.test",
            "username": "api",
            "password": "router-secret",
            "timeout_secs": 1
        },
        "billing": {
            "base_url": "http://billing.test",
            "api_key": "billing-key",
            "timeout_secs": 1
        },
        "session": {
            "default_ttl_secs": 3600,
            "sweep_interval_secs": 30,
            "cookie_secure": false
        },
        "features": {
            "voucher_enabled": true,
            "social_login_enabled": true,
            "terms_conditions_enabled": false
        },
        "rate_limit": {
            "auth_attempts": 1000,
            "auth_window_secs": 60
        }
    });

    if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
    }

    let config: PortalConfig = serde_json::from_value(base).expect("valid test config");
    config.validate().expect("test config passes validation");
    config
}

pub struct TestPortal {
    pub config: PortalConfig,
    pub orchestrator: Arc<AuthOrchestrator>,
    pub workers: Arc<BackgroundWorkers>,
    pub router: Arc<MockRouter>,
    pub billing: Arc<MockBilling>,
    pub radius: Arc<MockRadius>,
    pub social: Arc<MockSocialProvider>,
    pub vouchers: Arc<InMemoryVoucherStore>,
    pub users: Arc<InMemoryUserStore>,
    pub clock: Arc<ManualClock>,
}

impl TestPortal {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PortalConfig) -> Self {
        let router = Arc::new(MockRouter::new());
        let billing = Arc::new(MockBilling::new());
        let radius = Arc::new(MockRadius::new().with_user("radius-user", "radius-pass"));
        let social = Arc::new(MockSocialProvider::new(SOCIAL_PROVIDER).with_profile(
            SOCIAL_CODE,
            SocialProfile {
                subject: "1234567890".to_string(),
                email: Some("guest@example.com".to_string()),
                name: Some("Guest User".to_string()),
            },
        ));
        let vouchers = Arc::new(InMemoryVoucherStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let portal = assemble(
            &config,
            Adapters {
                router: router.clone(),
                billing: billing.clone(),
                voucher_store: vouchers.clone(),
                user_store: users.clone(),
                radius: Some(radius.clone() as Arc<dyn RadiusExchange>),
                social: vec![social.clone() as Arc<dyn SocialProvider>],
                clock: clock.clone() as Arc<dyn Clock>,
            },
        );

        Self {
            config,
            orchestrator: portal.orchestrator,
            workers: portal.workers,
            router,
            billing,
            radius,
            social,
            vouchers,
            users,
            clock,
        }
    }

    pub async fn add_user(&self, username: &str, password: &str, is_admin: bool) {
        let hash = hash_password(&Password::new(password.to_string())).unwrap();
        self.users
            .upsert(&LocalUser {
                username: username.to_string(),
                password_hash: hash.into_string(),
                display_name: None,
                is_admin,
                terms_accepted: false,
            })
            .await
            .unwrap();
    }

    pub async fn add_voucher(&self, code: &str, duration: Duration) -> Voucher {
        let voucher = Voucher::new(code, duration, Decimal::new(500, 2), self.clock.now());
        self.vouchers
            .insert_many(std::slice::from_ref(&voucher))
            .await
            .unwrap();
        voucher
    }

    pub async fn insert_voucher(&self, voucher: Voucher) {
        self.vouchers
            .insert_many(std::slice::from_ref(&voucher))
            .await
            .unwrap();
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn voucher_state(&self, code: &str) -> VoucherState {
        self.vouchers.get(code).await.unwrap().unwrap().state
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            config: self.config.clone(),
            orchestrator: self.orchestrator.clone(),
            users: self.users.clone(),
            db: None,
            auth_rate_limiter: create_ip_rate_limiter(
                self.config.rate_limit.auth_attempts,
                self.config.rate_limit.auth_window_secs,
            ),
        }
    }

    pub fn app(&self) -> axum::Router {
        build_router(self.app_state())
    }
}

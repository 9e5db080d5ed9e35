//! Composition root and server lifecycle.

use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::retry::RetryConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{AdminBootstrapConfig, PortalConfig};
use crate::models::LocalUser;
use crate::services::backends::{
    InMemoryUserStore, LocalBackend, OAuthProvider, PgUserStore, RadiusBackend, RadiusExchange,
    RadiusSettings, SocialBackend, SocialProvider, UdpRadiusClient, UserStore, VoucherBackend,
};
use crate::services::{
    AuthOrchestrator, BackgroundWorkers, BillingSystem, Clock, CredentialBackend, Database,
    HotspotRouter, InMemoryVoucherStore, LedgerSettings, NuxBillClient, PgVoucherStore,
    ProvisioningCoordinator, ProvisioningSettings, RouterOsClient, SessionStore, SystemClock,
    VoucherLedger, VoucherStore, WorkerIntervals,
};
use crate::utils::{hash_password, Password};
use crate::{build_router, AppState};

/// External capabilities the core is wired against.
pub struct Adapters {
    pub router: Arc<dyn HotspotRouter>,
    pub billing: Arc<dyn BillingSystem>,
    pub voucher_store: Arc<dyn VoucherStore>,
    pub user_store: Arc<dyn UserStore>,
    pub radius: Option<Arc<dyn RadiusExchange>>,
    pub social: Vec<Arc<dyn SocialProvider>>,
    pub clock: Arc<dyn Clock>,
}

/// The assembled core: the orchestrator owns the coordinator, which owns the
/// router handle.
pub struct Portal {
    pub orchestrator: Arc<AuthOrchestrator>,
    pub workers: Arc<BackgroundWorkers>,
}

/// Wire the core components. Password backends are tried Local, then RADIUS.
pub fn assemble(config: &PortalConfig, adapters: Adapters) -> Portal {
    let ledger = Arc::new(VoucherLedger::new(
        adapters.voucher_store,
        adapters.billing,
        Arc::clone(&adapters.clock),
        LedgerSettings {
            billing_timeout: Duration::from_secs(config.billing.timeout_secs),
            reservation_timeout: config.reservation_timeout(),
            code_length: config.voucher.code_length,
        },
    ));

    let coordinator = Arc::new(ProvisioningCoordinator::new(
        adapters.router,
        Arc::clone(&adapters.clock),
        ProvisioningSettings {
            profile: config.router.profile.clone(),
            call_timeout: Duration::from_secs(config.router.timeout_secs),
            retry: RetryConfig::once(),
            missing_entry_policy: config.provisioning.missing_entry_policy,
        },
    ));

    let sessions = Arc::new(SessionStore::new(
        Arc::clone(&coordinator),
        Arc::clone(&adapters.clock),
    ));

    let mut backends = vec![CredentialBackend::Local(LocalBackend::new(adapters.user_store))];
    if let Some(radius) = adapters.radius {
        backends.push(CredentialBackend::Radius(RadiusBackend::new(radius)));
    }
    backends.push(CredentialBackend::Voucher(VoucherBackend::new(Arc::clone(&ledger))));
    if !adapters.social.is_empty() {
        backends.push(CredentialBackend::Social(SocialBackend::new(adapters.social)));
    }

    let workers = Arc::new(BackgroundWorkers::new(
        Arc::clone(&sessions),
        Arc::clone(&coordinator),
        Arc::clone(&ledger),
        WorkerIntervals {
            sweep: config.sweep_interval(),
            reconcile: config.reconcile_interval(),
            janitor: config.janitor_interval(),
        },
    ));

    let orchestrator = Arc::new(AuthOrchestrator::new(
        backends,
        ledger,
        coordinator,
        sessions,
        adapters.clock,
        config.features.clone(),
        config.default_session_ttl(),
    ));

    Portal {
        orchestrator,
        workers,
    }
}

/// Create the configured admin account unless one with that name exists.
pub async fn bootstrap_admin(
    users: &dyn UserStore,
    admin: &AdminBootstrapConfig,
) -> Result<(), AppError> {
    let existing = users
        .find_by_username(&admin.username)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    if existing.is_some() {
        tracing::debug!(username = %admin.username, "Admin account already present");
        return Ok(());
    }

    let password = Password::new(admin.password.expose_secret().clone());
    let hash = hash_password(&password)?;
    users
        .upsert(&LocalUser {
            username: admin.username.clone(),
            password_hash: hash.into_string(),
            display_name: Some("Administrator".to_string()),
            is_admin: true,
            terms_accepted: true,
        })
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    tracing::info!(username = %admin.username, "Admin account created");
    Ok(())
}

fn config_error(what: &str, err: impl std::fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{}: {}", what, err))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    workers: Arc<BackgroundWorkers>,
}

impl Application {
    /// Connect to every external system and bind the listener.
    pub async fn build(config: PortalConfig) -> Result<Self, AppError> {
        let db = match &config.database {
            Some(db_config) => {
                let db = Database::connect(db_config).await?;
                db.run_migrations().await?;
                Some(db)
            }
            None => {
                tracing::warn!("No database configured, vouchers and users are kept in memory");
                None
            }
        };

        let (voucher_store, user_store): (Arc<dyn VoucherStore>, Arc<dyn UserStore>) = match &db {
            Some(db) => (
                Arc::new(PgVoucherStore::new(db.pool().clone())),
                Arc::new(PgUserStore::new(db.pool().clone())),
            ),
            None => (
                Arc::new(InMemoryVoucherStore::new()),
                Arc::new(InMemoryUserStore::new()),
            ),
        };

        if let Some(admin) = &config.admin {
            bootstrap_admin(user_store.as_ref(), admin).await?;
        }

        let router = RouterOsClient::new(&config.router).map_err(|e| config_error("router client", e))?;
        let billing = NuxBillClient::new(&config.billing).map_err(|e| config_error("billing client", e))?;

        let radius = config.radius.as_ref().map(|radius| {
            tracing::info!(server = %radius.server, port = radius.port, "RADIUS backend enabled");
            Arc::new(UdpRadiusClient::new(
                RadiusSettings::from(radius),
                radius.secret.clone(),
            )) as Arc<dyn RadiusExchange>
        });

        let mut social: Vec<Arc<dyn SocialProvider>> = Vec::new();
        for provider in &config.social.providers {
            let name = provider.name.clone();
            let client = OAuthProvider::new(provider.clone())
                .map_err(|e| config_error(&format!("social provider {}", name), e))?;
            tracing::info!(provider = %name, "Social provider registered");
            social.push(Arc::new(client));
        }

        let portal = assemble(
            &config,
            Adapters {
                router: Arc::new(router),
                billing: Arc::new(billing),
                voucher_store,
                user_store: Arc::clone(&user_store),
                radius,
                social,
                clock: Arc::new(SystemClock),
            },
        );

        let auth_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.auth_attempts,
            config.rate_limit.auth_window_secs,
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                orchestrator: portal.orchestrator,
                users: user_store,
                db,
                auth_rate_limiter,
            },
            workers: portal.workers,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Recover leftover state, start the background loops and serve until
    /// `shutdown` resolves. The loops are stopped and awaited before returning.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.recover().await;

        let token = CancellationToken::new();
        let handles = Arc::clone(&self.workers).spawn(token.clone());

        let app = build_router(self.state);
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        let served = axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        token.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Background worker ended abnormally");
            }
        }

        served.map_err(AppError::from)
    }
}

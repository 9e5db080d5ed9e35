use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;
use std::time::Duration;

use crate::{
    dtos::admin::{
        ActiveSessionDto, CreateUserRequest, GenerateVouchersRequest, SessionListResponse,
        UserDto, UserListResponse, VoucherListResponse,
    },
    middleware::AdminSession,
    models::LocalUser,
    services::PortalStats,
    utils::{hash_password, Password, ValidatedJson},
    AppState,
};

pub async fn list_sessions(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Json<SessionListResponse> {
    let sessions: Vec<ActiveSessionDto> = state
        .orchestrator
        .list_active_sessions()
        .iter()
        .map(ActiveSessionDto::from)
        .collect();
    let total = sessions.len();
    Json(SessionListResponse { sessions, total })
}

pub async fn list_vouchers(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<VoucherListResponse>, AppError> {
    let vouchers = state.orchestrator.list_vouchers().await?;
    let total = vouchers.len();
    Ok(Json(VoucherListResponse { vouchers, total }))
}

pub async fn generate_vouchers(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    ValidatedJson(req): ValidatedJson<GenerateVouchersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let duration_secs = req
        .duration_minutes
        .checked_mul(60)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Duration out of range")))?;
    let vouchers = state
        .orchestrator
        .generate_vouchers(req.count, Duration::from_secs(duration_secs), req.value)
        .await?;

    tracing::info!(
        admin = %admin.identity.user_id,
        count = vouchers.len(),
        duration_minutes = req.duration_minutes,
        "Vouchers generated"
    );

    let total = vouchers.len();
    Ok((StatusCode::CREATED, Json(VoucherListResponse { vouchers, total })))
}

pub async fn stats(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<PortalStats>, AppError> {
    Ok(Json(state.orchestrator.stats().await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminSession,
) -> Result<Json<UserListResponse>, AppError> {
    let users: Vec<UserDto> = state.users.list().await?.iter().map(UserDto::from).collect();
    let total = users.len();
    Ok(Json(UserListResponse { users, total }))
}

pub async fn create_user(
    State(state): State<AppState>,
    AdminSession(admin): AdminSession,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let username = req.username.trim().to_string();
    if username.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Username must not be blank")));
    }
    let password = Password::new(req.password);
    // Argon2 is CPU-bound; keep it off the async workers.
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Password hashing aborted: {}", e)))??;

    let user = LocalUser {
        username,
        password_hash: hash.into_string(),
        display_name: req.display_name,
        is_admin: req.is_admin,
        terms_accepted: req.terms_accepted,
    };
    state.users.create(&user).await?;

    tracing::info!(
        admin = %admin.identity.user_id,
        username = %user.username,
        is_admin = user.is_admin,
        "Portal user created"
    );

    Ok((StatusCode::CREATED, Json(UserDto::from(&user))))
}

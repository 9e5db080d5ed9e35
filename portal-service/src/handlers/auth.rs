use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        LoginRequest, MessageResponse, SessionInfoResponse, SessionResponse, SocialCallbackQuery,
        VoucherLoginRequest,
    },
    middleware::{session_token, CurrentSession},
    models::{AuthMethod, Credential, Session},
    services::AuthError,
    utils::{generate_session_id, ValidatedJson},
    AppState,
};

const OAUTH_STATE_COOKIE: &str = "oauth_state";
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

fn session_cookie(state: &AppState, session: &Session) -> Cookie<'static> {
    let remaining = session.remaining(state.orchestrator.now()).as_secs() as i64;
    Cookie::build((state.config.session.cookie_name.clone(), session.session_id.clone()))
        .path("/")
        .http_only(true)
        .secure(state.config.session.cookie_secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(remaining))
        .build()
}

fn removal_cookie(name: String) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

fn session_established(
    state: &AppState,
    jar: CookieJar,
    session: &Session,
) -> (CookieJar, Json<SessionResponse>) {
    let jar = jar.add(session_cookie(state, session));
    let body = SessionResponse::new(session, state.config.features.terms_conditions_enabled);
    (jar, Json(body))
}

/// Username/password login. Backends are tried in their configured order.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .orchestrator
        .authenticate(Credential::password(req.username, req.password))
        .await?;
    Ok(session_established(&state, jar, &session))
}

/// Voucher redemption.
pub async fn voucher(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<VoucherLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .orchestrator
        .authenticate(Credential::voucher(req.voucher_code))
        .await?;
    Ok(session_established(&state, jar, &session))
}

/// Start the social login flow by redirecting to the provider.
pub async fn social_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    if !state.orchestrator.features().social_login_enabled {
        return Err(AuthError::MethodDisabled(AuthMethod::Social).into());
    }
    let client = state
        .orchestrator
        .social()
        .and_then(|social| social.provider(&provider))
        .ok_or_else(|| AuthError::UnsupportedProvider(provider.clone()))?;

    let oauth_state = generate_session_id();
    let location = client.authorize_url(&oauth_state);

    let jar = jar.add(
        Cookie::build((OAUTH_STATE_COOKIE, oauth_state))
            .path("/")
            .http_only(true)
            .secure(state.config.session.cookie_secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(OAUTH_STATE_TTL_MINUTES))
            .build(),
    );

    tracing::debug!(provider = %provider, "Redirecting to social provider");
    Ok((jar, Redirect::to(&location)))
}

/// Provider callback: check `state`, exchange the code, open a session.
pub async fn social_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    jar: CookieJar,
    Query(query): Query<SocialCallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = query.error.as_deref() {
        tracing::info!(provider = %provider, error = %error, "Social provider returned an error");
        return Err(AuthError::InvalidCredential.into());
    }

    let stored_state = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    match (stored_state.as_deref(), query.state.as_deref()) {
        (Some(expected), Some(received)) if expected == received => {}
        _ => {
            tracing::warn!(provider = %provider, "OAuth state mismatch");
            return Err(AppError::BadRequest(anyhow::anyhow!("Invalid OAuth state")));
        }
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Missing authorization code")))?;

    let session = state
        .orchestrator
        .authenticate(Credential::social(provider, code))
        .await?;

    let jar = jar.remove(removal_cookie(OAUTH_STATE_COOKIE.to_string()));
    Ok(session_established(&state, jar, &session))
}

/// Describe the caller's session.
pub async fn session(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Json<SessionInfoResponse> {
    let remaining_secs = session.remaining(state.orchestrator.now()).as_secs() as i64;
    Json(SessionInfoResponse {
        session_id: session.session_id,
        identity: session.identity,
        created_at: session.created_at,
        expires_at: session.expires_at,
        remaining_secs,
        network_user_name: session.provisioning.network_user_name,
    })
}

/// End the caller's session. Succeeds even when no session exists.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    let cookie_name = state.config.session.cookie_name.clone();
    if let Some(token) = session_token(&headers, &cookie_name) {
        state.orchestrator.logout(&token).await;
    }

    (
        StatusCode::OK,
        jar.remove(removal_cookie(cookie_name)),
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{models::Session, services::AuthError, AppState};

/// Session id from the portal cookie, falling back to `Authorization: Bearer`.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(cookie_name) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// The caller's live session.
pub struct CurrentSession(pub Session);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers, &state.config.session.cookie_name)
            .ok_or(AuthError::SessionNotFound)?;

        let session = state.orchestrator.get_session(&token).await?;
        Ok(CurrentSession(session))
    }
}

/// A live session whose identity carries the admin flag.
pub struct AdminSession(pub Session);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentSession(session) = CurrentSession::from_request_parts(parts, state).await?;

        if !session.identity.is_admin {
            tracing::warn!(user_id = %session.identity.user_id, "Non-admin session denied admin access");
            return Err(AppError::Forbidden(anyhow::anyhow!("Admin access required")));
        }
        Ok(AdminSession(session))
    }
}

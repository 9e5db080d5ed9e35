use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Identity, Session};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 128, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VoucherLoginRequest {
    #[validate(length(min = 1, max = 64, message = "Voucher code is required"))]
    pub voucher_code: String,
}

#[derive(Debug, Deserialize)]
pub struct SocialCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Body returned on every successful login.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
    pub terms_required: bool,
}

impl SessionResponse {
    pub fn new(session: &Session, terms_enabled: bool) -> Self {
        Self {
            session_id: session.session_id.clone(),
            expires_at: session.expires_at,
            identity: session.identity.clone(),
            terms_required: terms_enabled && !session.identity.terms_accepted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionInfoResponse {
    pub session_id: String,
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: i64,
    pub network_user_name: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{LocalUser, Session, Voucher};

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("negative_value"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateVouchersRequest {
    #[validate(range(min = 1, max = 500, message = "Count must be between 1 and 500"))]
    pub count: usize,

    #[validate(range(
        min = 1,
        max = 525_600,
        message = "Duration must be between one minute and one year"
    ))]
    pub duration_minutes: u64,

    #[serde(default)]
    #[validate(custom(function = "validate_non_negative"))]
    pub value: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ActiveSessionDto {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
    pub network_user_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for ActiveSessionDto {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.identity.user_id.clone(),
            display_name: session.identity.display_name.clone(),
            network_user_name: session.provisioning.network_user_name.clone(),
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<ActiveSessionDto>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct VoucherListResponse {
    pub vouchers: Vec<Voucher>,
    pub total: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 128, message = "Username must be 1 to 128 characters"))]
    pub username: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub password: String,

    #[validate(length(max = 255))]
    pub display_name: Option<String>,

    #[serde(default)]
    pub is_admin: bool,

    #[serde(default)]
    pub terms_accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub username: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub terms_accepted: bool,
}

impl From<&LocalUser> for UserDto {
    fn from(user: &LocalUser) -> Self {
        Self {
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            is_admin: user.is_admin,
            terms_accepted: user.terms_accepted,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserDto>,
    pub total: usize,
}

//! Local portal accounts checked by the Local backend.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Identity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocalUser {
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub terms_accepted: bool,
}

impl LocalUser {
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: format!("local:{}", self.username),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.username.clone()),
            is_admin: self.is_admin,
            terms_accepted: self.terms_accepted,
        }
    }
}

//! Verified identities and the credential forms that produce them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::Password;

/// A verified user, produced by a credential backend and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub terms_accepted: bool,
}

impl Identity {
    /// A non-admin identity that has not yet accepted the portal terms.
    pub fn guest(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            is_admin: false,
            terms_accepted: false,
        }
    }
}

/// Which family of backends a credential is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    Voucher,
    Social,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::Voucher => "voucher",
            AuthMethod::Social => "social",
        }
    }
}

/// Input for one authentication attempt. Never persisted.
#[derive(Clone)]
pub enum Credential {
    Password { username: String, password: Password },
    Voucher { code: String },
    Social { provider: String, token: String },
}

impl Credential {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Password {
            username: username.into(),
            password: Password::new(password.into()),
        }
    }

    pub fn voucher(code: impl Into<String>) -> Self {
        Credential::Voucher { code: code.into() }
    }

    pub fn social(provider: impl Into<String>, token: impl Into<String>) -> Self {
        Credential::Social {
            provider: provider.into(),
            token: token.into(),
        }
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password { .. } => AuthMethod::Password,
            Credential::Voucher { .. } => AuthMethod::Voucher,
            Credential::Social { .. } => AuthMethod::Social,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credential::Voucher { .. } => f.debug_struct("Voucher").finish_non_exhaustive(),
            Credential::Social { provider, .. } => f
                .debug_struct("Social")
                .field("provider", provider)
                .finish_non_exhaustive(),
        }
    }
}

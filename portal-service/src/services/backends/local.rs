//! Username/password accounts kept by the portal itself.

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use sqlx::PgPool;
use tracing::{debug, error};

use super::Verified;
use crate::models::LocalUser;
use crate::services::error::{BackendError, StoreError};
use crate::utils::{verify_password, Password, PasswordHashString};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>, StoreError>;

    async fn upsert(&self, user: &LocalUser) -> Result<(), StoreError>;

    /// Insert a new account; `Conflict` if the username is taken.
    async fn create(&self, user: &LocalUser) -> Result<(), StoreError>;

    /// All accounts ordered by username.
    async fn list(&self) -> Result<Vec<LocalUser>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, LocalUser>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>, StoreError> {
        Ok(self.users.get(username).map(|u| u.clone()))
    }

    async fn upsert(&self, user: &LocalUser) -> Result<(), StoreError> {
        self.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn create(&self, user: &LocalUser) -> Result<(), StoreError> {
        match self.users.entry(user.username.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(user.username.clone())),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(())
            }
        }
    }

    async fn list(&self) -> Result<Vec<LocalUser>, StoreError> {
        let mut users: Vec<LocalUser> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<LocalUser>, StoreError> {
        let user = sqlx::query_as::<_, LocalUser>(
            r#"
            SELECT username, password_hash, display_name, is_admin, terms_accepted
            FROM portal_users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn upsert(&self, user: &LocalUser) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portal_users (username, password_hash, display_name, is_admin, terms_accepted)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO UPDATE
            SET password_hash = EXCLUDED.password_hash,
                display_name = EXCLUDED.display_name,
                is_admin = EXCLUDED.is_admin,
                terms_accepted = EXCLUDED.terms_accepted
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.is_admin)
        .bind(user.terms_accepted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create(&self, user: &LocalUser) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO portal_users (username, password_hash, display_name, is_admin, terms_accepted)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(user.is_admin)
        .bind(user.terms_accepted)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(user.username.clone())
            }
            other => StoreError::Database(other),
        })?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LocalUser>, StoreError> {
        let users = sqlx::query_as::<_, LocalUser>(
            r#"
            SELECT username, password_hash, display_name, is_admin, terms_accepted
            FROM portal_users
            ORDER BY username
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}

pub struct LocalBackend {
    users: std::sync::Arc<dyn UserStore>,
}

impl LocalBackend {
    pub fn new(users: std::sync::Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    pub async fn verify(&self, username: &str, password: &Password) -> Result<Verified, BackendError> {
        let user = self
            .users
            .find_by_username(username.trim())
            .await
            .map_err(|e| {
                error!(error = %e, "Local user store unavailable");
                BackendError::Unavailable(e.to_string())
            })?
            .ok_or_else(|| {
                debug!("Unknown local user");
                BackendError::InvalidCredential
            })?;

        // Argon2 is CPU-bound; keep it off the async workers.
        let hash = PasswordHashString::new(user.password_hash.clone());
        let password = password.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| BackendError::Unavailable(format!("Password check aborted: {}", e)))?
            .map_err(|e| {
                error!(username = %user.username, error = %e, "Stored password hash is unreadable");
                BackendError::Unavailable(e.to_string())
            })?;

        if !matches {
            return Err(BackendError::InvalidCredential);
        }

        Ok(Verified::new(user.identity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash_password;
    use std::sync::Arc;

    async fn backend_with(username: &str, password: &str) -> LocalBackend {
        let store = Arc::new(InMemoryUserStore::new());
        let hash = hash_password(&Password::new(password.to_string())).unwrap();
        store
            .upsert(&LocalUser {
                username: username.to_string(),
                password_hash: hash.into_string(),
                display_name: Some("Front Desk".to_string()),
                is_admin: true,
                terms_accepted: true,
            })
            .await
            .unwrap();
        LocalBackend::new(store)
    }

    #[tokio::test]
    async fn test_verify_local_user() {
        let backend = backend_with("desk", "s3cret").await;

        let verified = backend
            .verify("desk", &Password::new("s3cret".to_string()))
            .await
            .unwrap();
        assert_eq!(verified.identity.user_id, "local:desk");
        assert!(verified.identity.is_admin);
        assert!(verified.session_ttl.is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user() {
        let backend = backend_with("desk", "s3cret").await;

        assert_eq!(
            backend
                .verify("desk", &Password::new("nope".to_string()))
                .await
                .unwrap_err(),
            BackendError::InvalidCredential
        );
        assert_eq!(
            backend
                .verify("ghost", &Password::new("s3cret".to_string()))
                .await
                .unwrap_err(),
            BackendError::InvalidCredential
        );
    }

    #[tokio::test]
    async fn test_create_rejects_taken_username() {
        let store = InMemoryUserStore::new();
        let user = LocalUser {
            username: "desk".to_string(),
            password_hash: "hash".to_string(),
            display_name: None,
            is_admin: false,
            terms_accepted: false,
        };
        store.create(&user).await.unwrap();
        assert!(matches!(
            store.create(&user).await,
            Err(StoreError::Conflict(name)) if name == "desk"
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}

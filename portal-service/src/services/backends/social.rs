//! Third-party login via the OAuth 2.0 authorization-code flow.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use super::Verified;
use crate::config::SocialProviderConfig;
use crate::models::Identity;
use crate::services::error::{BackendError, SocialError};

/// Profile returned by a provider after a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[async_trait]
pub trait SocialProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Where to send the browser to start the flow.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for the user's profile.
    async fn exchange(&self, code: &str) -> Result<SocialProfile, SocialError>;
}

pub struct OAuthProvider {
    config: SocialProviderConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl OAuthProvider {
    pub fn new(config: SocialProviderConfig) -> Result<Self, SocialError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SocialError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SocialError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(SocialError::Rejected(format!("status {}: {}", status, body)))
        } else {
            Err(SocialError::Transport(format!("status {}: {}", status, body)))
        }
    }
}

fn map_transport(e: reqwest::Error) -> SocialError {
    if e.is_timeout() {
        SocialError::Timeout
    } else {
        SocialError::Transport(e.to_string())
    }
}

#[async_trait]
impl SocialProvider for OAuthProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn authorize_url(&self, state: &str) -> String {
        let separator = if self.config.authorize_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.authorize_url,
            separator,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&self.config.scope),
            urlencoding::encode(state),
        )
    }

    async fn exchange(&self, code: &str) -> Result<SocialProfile, SocialError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(map_transport)?;

        let token: TokenResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SocialError::Rejected(format!("Malformed token response: {}", e)))?;

        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(map_transport)?;

        let info: UserInfo = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SocialError::Rejected(format!("Malformed profile: {}", e)))?;

        let subject = info
            .sub
            .or_else(|| {
                info.id.map(|id| match id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
            .ok_or_else(|| SocialError::Rejected("profile has no subject".to_string()))?;

        Ok(SocialProfile {
            subject,
            email: info.email,
            name: info.name,
        })
    }
}

/// Mock social provider for testing: each registered code yields one profile.
pub struct MockSocialProvider {
    name: String,
    profiles: Mutex<HashMap<String, SocialProfile>>,
    failure: Mutex<Option<SocialError>>,
}

impl MockSocialProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            profiles: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn with_profile(self, code: &str, profile: SocialProfile) -> Self {
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(code.to_string(), profile);
        self
    }

    pub fn set_failure(&self, error: Option<SocialError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }
}

#[async_trait]
impl SocialProvider for MockSocialProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("https://{}.example/authorize?state={}", self.name, state)
    }

    async fn exchange(&self, code: &str) -> Result<SocialProfile, SocialError> {
        if let Some(err) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(err);
        }
        self.profiles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(code)
            .cloned()
            .ok_or_else(|| SocialError::Rejected("[MOCK] unknown code".to_string()))
    }
}

/// Routes a social credential to the provider it names.
pub struct SocialBackend {
    providers: HashMap<String, Arc<dyn SocialProvider>>,
}

impl SocialBackend {
    pub fn new(providers: impl IntoIterator<Item = Arc<dyn SocialProvider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_lowercase(), p))
                .collect(),
        }
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn SocialProvider>> {
        self.providers.get(&name.to_lowercase())
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn verify(&self, provider: &str, token: &str) -> Result<Verified, BackendError> {
        let client = self
            .provider(provider)
            .ok_or_else(|| BackendError::UnsupportedProvider(provider.to_string()))?;

        match client.exchange(token).await {
            Ok(profile) => {
                let display_name = profile
                    .name
                    .or(profile.email)
                    .unwrap_or_else(|| profile.subject.clone());
                Ok(Verified::new(Identity::guest(
                    format!("{}:{}", client.name().to_lowercase(), profile.subject),
                    display_name,
                )))
            }
            Err(SocialError::Rejected(reason)) => {
                warn!(provider = %provider, reason = %reason, "Social login rejected");
                Err(BackendError::InvalidCredential)
            }
            Err(SocialError::Timeout) => Err(BackendError::Timeout),
            Err(SocialError::Transport(e)) => Err(BackendError::Unavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SocialBackend {
        let google = MockSocialProvider::new("google").with_profile(
            "good-code",
            SocialProfile {
                subject: "1234".to_string(),
                email: Some("guest@example.com".to_string()),
                name: None,
            },
        );
        SocialBackend::new([Arc::new(google) as Arc<dyn SocialProvider>])
    }

    #[tokio::test]
    async fn test_verify_maps_profile_to_identity() {
        let verified = backend().verify("Google", "good-code").await.unwrap();
        assert_eq!(verified.identity.user_id, "google:1234");
        assert_eq!(verified.identity.display_name, "guest@example.com");
        assert!(!verified.identity.is_admin);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_bad_code() {
        let backend = backend();
        assert_eq!(
            backend.verify("myspace", "x").await.unwrap_err(),
            BackendError::UnsupportedProvider("myspace".to_string())
        );
        assert_eq!(
            backend.verify("google", "bad-code").await.unwrap_err(),
            BackendError::InvalidCredential
        );
    }
}

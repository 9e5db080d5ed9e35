//! Hotspot router capability and its RouterOS REST implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::models::RouterHandle;
use crate::services::error::RouterError;

/// A hotspot user to create on the router.
#[derive(Debug, Clone)]
pub struct HotspotUserSpec {
    pub name: String,
    pub password: String,
    pub profile: String,
    pub uptime_limit: Duration,
    /// Idempotency key, stored as the entry comment.
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotspotEntry {
    pub handle: RouterHandle,
    pub name: String,
    pub comment: Option<String>,
}

/// A client currently logged in to the hotspot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHost {
    pub user: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, rename = "mac-address")]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
}

#[async_trait]
pub trait HotspotRouter: Send + Sync {
    async fn add_hotspot_user(&self, spec: &HotspotUserSpec) -> Result<RouterHandle, RouterError>;

    /// Remove by handle; `NotFound` if the entry does not exist.
    async fn remove_hotspot_user(&self, handle: &RouterHandle) -> Result<(), RouterError>;

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<HotspotEntry>, RouterError>;

    async fn list_hotspot_users(&self) -> Result<Vec<HotspotEntry>, RouterError>;

    async fn list_active_hosts(&self) -> Result<Vec<ActiveHost>, RouterError>;

    async fn health_check(&self) -> Result<(), RouterError>;
}

/// RouterOS `limit-uptime` format: `[Nd]HH:MM:SS`.
pub fn format_uptime_limit(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// MikroTik RouterOS v7 REST API client.
pub struct RouterOsClient {
    base_url: String,
    username: String,
    password: Secret<String>,
    client: Client,
}

#[derive(Debug, Serialize)]
struct AddUserRequest<'a> {
    name: &'a str,
    password: &'a str,
    profile: &'a str,
    #[serde(rename = "limit-uptime")]
    limit_uptime: String,
    comment: &'a str,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(rename = ".id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    comment: Option<String>,
}

impl From<UserRecord> for HotspotEntry {
    fn from(record: UserRecord) -> Self {
        HotspotEntry {
            handle: RouterHandle::new(record.id),
            name: record.name,
            comment: record.comment,
        }
    }
}

impl RouterOsClient {
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RouterError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RouterError> {
        let response = builder.send().await.map_err(map_transport)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RouterError::NotFound);
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
            Err(RouterError::Unavailable(format!("status {}: {}", status, body)))
        } else {
            Err(RouterError::Rejected(format!("status {}: {}", status, body)))
        }
    }

    async fn fetch_users(&self, builder: reqwest::RequestBuilder) -> Result<Vec<HotspotEntry>, RouterError> {
        let records: Vec<UserRecord> = self
            .send(builder)
            .await?
            .json()
            .await
            .map_err(map_transport)?;
        Ok(records.into_iter().map(HotspotEntry::from).collect())
    }
}

fn map_transport(e: reqwest::Error) -> RouterError {
    if e.is_timeout() {
        RouterError::Timeout
    } else {
        RouterError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl HotspotRouter for RouterOsClient {
    async fn add_hotspot_user(&self, spec: &HotspotUserSpec) -> Result<RouterHandle, RouterError> {
        let body = AddUserRequest {
            name: &spec.name,
            password: &spec.password,
            profile: &spec.profile,
            limit_uptime: format_uptime_limit(spec.uptime_limit),
            comment: &spec.comment,
        };

        let record: UserRecord = self
            .send(self.request(reqwest::Method::PUT, "/ip/hotspot/user").json(&body))
            .await?
            .json()
            .await
            .map_err(map_transport)?;

        Ok(RouterHandle::new(record.id))
    }

    async fn remove_hotspot_user(&self, handle: &RouterHandle) -> Result<(), RouterError> {
        let path = format!("/ip/hotspot/user/{}", urlencoding::encode(handle.as_str()));
        self.send(self.request(reqwest::Method::DELETE, &path))
            .await
            .map(|_| ())
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<HotspotEntry>, RouterError> {
        let builder = self
            .request(reqwest::Method::GET, "/ip/hotspot/user")
            .query(&[("comment", idempotency_key)]);
        let entries = self.fetch_users(builder).await?;
        Ok(entries
            .into_iter()
            .find(|e| e.comment.as_deref() == Some(idempotency_key)))
    }

    async fn list_hotspot_users(&self) -> Result<Vec<HotspotEntry>, RouterError> {
        self.fetch_users(self.request(reqwest::Method::GET, "/ip/hotspot/user"))
            .await
    }

    async fn list_active_hosts(&self) -> Result<Vec<ActiveHost>, RouterError> {
        self.send(self.request(reqwest::Method::GET, "/ip/hotspot/active"))
            .await?
            .json()
            .await
            .map_err(map_transport)
    }

    async fn health_check(&self) -> Result<(), RouterError> {
        self.send(self.request(reqwest::Method::GET, "/system/resource"))
            .await
            .map(|_| ())
    }
}

/// Scripted response to a `MockRouter::add_hotspot_user` call.
#[derive(Debug, Clone)]
pub enum MockAddBehavior {
    Succeed,
    Fail(RouterError),
    /// The entry is created but the caller sees a timeout.
    TimeoutAfterCommit,
}

/// In-memory router for testing.
///
/// Adds succeed unless scripted otherwise; every call is counted so tests can
/// assert exactly-once revocation.
pub struct MockRouter {
    entries: Mutex<BTreeMap<String, HotspotEntry>>,
    add_script: Mutex<VecDeque<MockAddBehavior>>,
    add_delay: Mutex<Option<Duration>>,
    fail_removes: AtomicBool,
    next_id: AtomicU64,
    add_calls: AtomicU64,
    remove_calls: AtomicU64,
}

impl MockRouter {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            add_script: Mutex::new(VecDeque::new()),
            add_delay: Mutex::new(None),
            fail_removes: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            add_calls: AtomicU64::new(0),
            remove_calls: AtomicU64::new(0),
        }
    }

    pub fn script_adds(&self, behaviors: impl IntoIterator<Item = MockAddBehavior>) {
        self.add_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(behaviors);
    }

    pub fn set_add_delay(&self, delay: Option<Duration>) {
        *self.add_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn set_fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub fn add_calls(&self) -> u64 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn entries(&self) -> Vec<HotspotEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, handle: &RouterHandle) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(handle.as_str())
    }

    /// Create an entry directly, as if left behind by a crashed process.
    pub fn insert_entry(&self, name: &str, comment: &str) -> RouterHandle {
        self.commit(name, comment)
    }

    /// Delete an entry without counting a remove call, as if an operator did it.
    pub fn drop_entry(&self, handle: &RouterHandle) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle.as_str());
    }

    fn commit(&self, name: &str, comment: &str) -> RouterHandle {
        let handle = RouterHandle::new(format!("*{:X}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).insert(
            handle.as_str().to_string(),
            HotspotEntry {
                handle: handle.clone(),
                name: name.to_string(),
                comment: Some(comment.to_string()),
            },
        );
        handle
    }
}

impl Default for MockRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HotspotRouter for MockRouter {
    async fn add_hotspot_user(&self, spec: &HotspotUserSpec) -> Result<RouterHandle, RouterError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.add_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .add_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(MockAddBehavior::Succeed);

        match behavior {
            MockAddBehavior::Succeed => Ok(self.commit(&spec.name, &spec.comment)),
            MockAddBehavior::Fail(err) => Err(err),
            MockAddBehavior::TimeoutAfterCommit => {
                self.commit(&spec.name, &spec.comment);
                Err(RouterError::Timeout)
            }
        }
    }

    async fn remove_hotspot_user(&self, handle: &RouterHandle) -> Result<(), RouterError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(RouterError::Unavailable("[MOCK] router down".to_string()));
        }

        match self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(handle.as_str())
        {
            Some(_) => Ok(()),
            None => Err(RouterError::NotFound),
        }
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<HotspotEntry>, RouterError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|e| e.comment.as_deref() == Some(idempotency_key))
            .cloned())
    }

    async fn list_hotspot_users(&self) -> Result<Vec<HotspotEntry>, RouterError> {
        Ok(self.entries())
    }

    async fn list_active_hosts(&self) -> Result<Vec<ActiveHost>, RouterError> {
        Ok(self
            .entries()
            .into_iter()
            .map(|e| ActiveHost {
                user: e.name,
                address: None,
                mac_address: None,
                uptime: None,
            })
            .collect())
    }

    async fn health_check(&self) -> Result<(), RouterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime_limit() {
        assert_eq!(format_uptime_limit(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_uptime_limit(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(format_uptime_limit(Duration::from_secs(5_025)), "01:23:45");
        assert_eq!(
            format_uptime_limit(Duration::from_secs(86_400 + 3_600)),
            "1d01:00:00"
        );
    }

    #[tokio::test]
    async fn test_mock_timeout_after_commit_leaves_entry() {
        let router = MockRouter::new();
        router.script_adds([MockAddBehavior::TimeoutAfterCommit]);

        let spec = HotspotUserSpec {
            name: "guest".into(),
            password: "pw".into(),
            profile: "default".into(),
            uptime_limit: Duration::from_secs(60),
            comment: "portal:abc".into(),
        };

        assert_eq!(
            router.add_hotspot_user(&spec).await,
            Err(RouterError::Timeout)
        );
        assert!(router.find_by_key("portal:abc").await.unwrap().is_some());

        let entry = router.find_by_key("portal:abc").await.unwrap().unwrap();
        router.remove_hotspot_user(&entry.handle).await.unwrap();
        assert_eq!(
            router.remove_hotspot_user(&entry.handle).await,
            Err(RouterError::NotFound)
        );
        assert_eq!(router.remove_calls(), 2);
    }
}

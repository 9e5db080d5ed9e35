//! RADIUS (RFC 2865) Access-Request with PAP.

use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, warn};

use super::Verified;
use crate::config::RadiusConfig;
use crate::models::Identity;
use crate::services::error::{BackendError, RadiusError};
use crate::utils::Password;

const ACCESS_REQUEST: u8 = 1;
const ACCESS_ACCEPT: u8 = 2;
const ACCESS_REJECT: u8 = 3;
const ACCESS_CHALLENGE: u8 = 11;

const ATTR_USER_NAME: u8 = 1;
const ATTR_USER_PASSWORD: u8 = 2;
const ATTR_REPLY_MESSAGE: u8 = 18;
const ATTR_SESSION_TIMEOUT: u8 = 27;
const ATTR_NAS_IDENTIFIER: u8 = 32;

const HEADER_LEN: usize = 20;
const MAX_PACKET_LEN: usize = 4096;
const MAX_PASSWORD_LEN: usize = 128;

/// Result of a completed RADIUS exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadiusOutcome {
    Accept {
        session_timeout: Option<Duration>,
        reply_message: Option<String>,
    },
    Reject,
}

#[async_trait]
pub trait RadiusExchange: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<RadiusOutcome, RadiusError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Packet {
    pub code: u8,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<(u8, Vec<u8>)>,
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, RadiusError> {
        let mut body = Vec::new();
        for (kind, value) in &self.attributes {
            if value.len() > 253 {
                return Err(RadiusError::Protocol(format!(
                    "attribute {} too long ({} bytes)",
                    kind,
                    value.len()
                )));
            }
            body.push(*kind);
            body.push((value.len() + 2) as u8);
            body.extend_from_slice(value);
        }

        let length = HEADER_LEN + body.len();
        if length > MAX_PACKET_LEN {
            return Err(RadiusError::Protocol("packet too long".to_string()));
        }

        let mut out = Vec::with_capacity(length);
        out.push(self.code);
        out.push(self.identifier);
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out.extend_from_slice(&self.authenticator);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RadiusError> {
        if bytes.len() < HEADER_LEN {
            return Err(RadiusError::Protocol("short packet".to_string()));
        }
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if length < HEADER_LEN || length > bytes.len() {
            return Err(RadiusError::Protocol(format!("bad length {}", length)));
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&bytes[4..HEADER_LEN]);

        let mut attributes = Vec::new();
        let mut rest = &bytes[HEADER_LEN..length];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(RadiusError::Protocol("truncated attribute".to_string()));
            }
            let attr_len = rest[1] as usize;
            if attr_len < 2 || attr_len > rest.len() {
                return Err(RadiusError::Protocol("bad attribute length".to_string()));
            }
            attributes.push((rest[0], rest[2..attr_len].to_vec()));
            rest = &rest[attr_len..];
        }

        Ok(Self {
            code: bytes[0],
            identifier: bytes[1],
            authenticator,
            attributes,
        })
    }

    pub fn attribute(&self, kind: u8) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_slice())
    }
}

/// User-Password hiding: `c(i) = p(i) xor MD5(secret + c(i-1))`, with the
/// request authenticator as `c(0)`.
pub(crate) fn hide_password(
    password: &[u8],
    secret: &[u8],
    authenticator: &[u8; 16],
) -> Result<Vec<u8>, RadiusError> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(RadiusError::Protocol("password too long".to_string()));
    }

    let mut padded = password.to_vec();
    let padded_len = ((padded.len() + 15) / 16).max(1) * 16;
    padded.resize(padded_len, 0);

    let mut hidden = Vec::with_capacity(padded_len);
    let mut previous: Vec<u8> = authenticator.to_vec();
    for chunk in padded.chunks(16) {
        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(&previous);
        let key = hasher.finalize();

        let block: Vec<u8> = chunk.iter().zip(key.iter()).map(|(p, k)| p ^ k).collect();
        hidden.extend_from_slice(&block);
        previous = block;
    }
    Ok(hidden)
}

/// `MD5(Code + ID + Length + RequestAuth + Attributes + Secret)`.
pub(crate) fn response_authenticator(
    response: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(&response[..4]);
    hasher.update(request_authenticator);
    hasher.update(&response[HEADER_LEN..]);
    hasher.update(secret);

    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[derive(Debug, Clone)]
pub struct RadiusSettings {
    pub server: String,
    pub port: u16,
    pub nas_identifier: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl From<&RadiusConfig> for RadiusSettings {
    fn from(config: &RadiusConfig) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            nas_identifier: config.nas_identifier.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            retries: config.retries,
        }
    }
}

pub struct UdpRadiusClient {
    settings: RadiusSettings,
    secret: Secret<String>,
    next_id: AtomicU8,
}

impl UdpRadiusClient {
    pub fn new(settings: RadiusSettings, secret: Secret<String>) -> Self {
        let mut seed = [0u8; 1];
        OsRng.fill_bytes(&mut seed);
        Self {
            settings,
            secret,
            next_id: AtomicU8::new(seed[0]),
        }
    }

    fn build_request(
        &self,
        identifier: u8,
        username: &str,
        password: &str,
    ) -> Result<(Vec<u8>, [u8; 16]), RadiusError> {
        let mut authenticator = [0u8; 16];
        OsRng.fill_bytes(&mut authenticator);

        let secret = self.secret.expose_secret().as_bytes();
        let packet = Packet {
            code: ACCESS_REQUEST,
            identifier,
            authenticator,
            attributes: vec![
                (ATTR_USER_NAME, username.as_bytes().to_vec()),
                (
                    ATTR_USER_PASSWORD,
                    hide_password(password.as_bytes(), secret, &authenticator)?,
                ),
                (
                    ATTR_NAS_IDENTIFIER,
                    self.settings.nas_identifier.as_bytes().to_vec(),
                ),
            ],
        };
        Ok((packet.encode()?, authenticator))
    }

    fn interpret(
        &self,
        bytes: &[u8],
        identifier: u8,
        request_authenticator: &[u8; 16],
    ) -> Result<Option<RadiusOutcome>, RadiusError> {
        let response = Packet::decode(bytes)?;
        if response.identifier != identifier {
            debug!(identifier = response.identifier, "Ignoring RADIUS reply for another request");
            return Ok(None);
        }

        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let expected = response_authenticator(
            &bytes[..length],
            request_authenticator,
            self.secret.expose_secret().as_bytes(),
        );
        if expected != response.authenticator {
            return Err(RadiusError::Protocol(
                "response authenticator mismatch".to_string(),
            ));
        }

        match response.code {
            ACCESS_ACCEPT => {
                let session_timeout = response
                    .attribute(ATTR_SESSION_TIMEOUT)
                    .and_then(|v| <[u8; 4]>::try_from(v).ok())
                    .map(|b| Duration::from_secs(u64::from(u32::from_be_bytes(b))))
                    .filter(|d| !d.is_zero());
                let reply_message = response
                    .attribute(ATTR_REPLY_MESSAGE)
                    .map(|v| String::from_utf8_lossy(v).into_owned());
                Ok(Some(RadiusOutcome::Accept {
                    session_timeout,
                    reply_message,
                }))
            }
            ACCESS_REJECT | ACCESS_CHALLENGE => Ok(Some(RadiusOutcome::Reject)),
            other => Err(RadiusError::Protocol(format!("unexpected code {}", other))),
        }
    }
}

#[async_trait]
impl RadiusExchange for UdpRadiusClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<RadiusOutcome, RadiusError> {
        let server = lookup_host((self.settings.server.as_str(), self.settings.port))
            .await
            .map_err(|e| RadiusError::Transport(format!("resolve {}: {}", self.settings.server, e)))?
            .next()
            .ok_or_else(|| RadiusError::Transport(format!("no address for {}", self.settings.server)))?;

        let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| RadiusError::Transport(e.to_string()))?;
        socket
            .connect(server)
            .await
            .map_err(|e| RadiusError::Transport(e.to_string()))?;

        let identifier = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (request, authenticator) = self.build_request(identifier, username, password)?;
        let mut buf = vec![0u8; MAX_PACKET_LEN];

        for attempt in 0..=self.settings.retries {
            socket
                .send(&request)
                .await
                .map_err(|e| RadiusError::Transport(e.to_string()))?;

            let deadline = tokio::time::Instant::now() + self.settings.timeout;
            loop {
                let received = tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await;
                let len = match received {
                    Err(_) => break,
                    Ok(Err(e)) => return Err(RadiusError::Transport(e.to_string())),
                    Ok(Ok(len)) => len,
                };
                if let Some(outcome) = self.interpret(&buf[..len], identifier, &authenticator)? {
                    return Ok(outcome);
                }
            }

            warn!(attempt = attempt + 1, server = %server, "RADIUS request timed out");
        }

        Err(RadiusError::Timeout)
    }
}

/// Mock RADIUS server for testing: accepts configured username/password pairs.
pub struct MockRadius {
    users: Mutex<HashMap<String, String>>,
    failure: Mutex<Option<RadiusError>>,
}

impl MockRadius {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        }
    }

    pub fn with_user(self, username: &str, password: &str) -> Self {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(username.to_string(), password.to_string());
        self
    }

    /// Make every exchange fail with `error` (or succeed normally with `None`).
    pub fn set_failure(&self, error: Option<RadiusError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = error;
    }
}

impl Default for MockRadius {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadiusExchange for MockRadius {
    async fn authenticate(&self, username: &str, password: &str) -> Result<RadiusOutcome, RadiusError> {
        if let Some(err) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(err);
        }
        let accepted = self
            .users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(username)
            .is_some_and(|expected| expected == password);

        Ok(if accepted {
            RadiusOutcome::Accept {
                session_timeout: None,
                reply_message: None,
            }
        } else {
            RadiusOutcome::Reject
        })
    }
}

pub struct RadiusBackend {
    exchange: std::sync::Arc<dyn RadiusExchange>,
}

impl RadiusBackend {
    pub fn new(exchange: std::sync::Arc<dyn RadiusExchange>) -> Self {
        Self { exchange }
    }

    pub async fn verify(&self, username: &str, password: &Password) -> Result<Verified, BackendError> {
        let username = username.trim();
        match self.exchange.authenticate(username, password.as_str()).await {
            Ok(RadiusOutcome::Accept {
                session_timeout, ..
            }) => Ok(Verified {
                identity: Identity::guest(format!("radius:{}", username), username),
                session_ttl: session_timeout,
            }),
            Ok(RadiusOutcome::Reject) => Err(BackendError::InvalidCredential),
            Err(RadiusError::Protocol(reason)) => {
                warn!(reason = %reason, "RADIUS protocol failure treated as rejection");
                Err(BackendError::InvalidCredential)
            }
            Err(RadiusError::Timeout) => Err(BackendError::Timeout),
            Err(RadiusError::Transport(e)) => Err(BackendError::Unavailable(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "testing123";

    fn reveal_password(hidden: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
        let mut plain = Vec::new();
        let mut previous = authenticator.to_vec();
        for chunk in hidden.chunks(16) {
            let mut hasher = Md5::new();
            hasher.update(secret);
            hasher.update(&previous);
            let key = hasher.finalize();
            plain.extend(chunk.iter().zip(key.iter()).map(|(c, k)| c ^ k));
            previous = chunk.to_vec();
        }
        while plain.last() == Some(&0) {
            plain.pop();
        }
        plain
    }

    /// Answer one Access-Request the way a RADIUS server would.
    fn server_reply(request: &[u8], accept_password: &str, tamper: bool) -> Vec<u8> {
        let packet = Packet::decode(request).unwrap();
        let hidden = packet.attribute(ATTR_USER_PASSWORD).unwrap();
        let password = reveal_password(hidden, SECRET.as_bytes(), &packet.authenticator);

        let (code, attributes) = if password == accept_password.as_bytes() {
            (
                ACCESS_ACCEPT,
                vec![(ATTR_SESSION_TIMEOUT, 1800u32.to_be_bytes().to_vec())],
            )
        } else {
            (ACCESS_REJECT, vec![])
        };

        let mut reply = Packet {
            code,
            identifier: packet.identifier,
            authenticator: [0u8; 16],
            attributes,
        }
        .encode()
        .unwrap();
        let auth = response_authenticator(&reply, &packet.authenticator, SECRET.as_bytes());
        reply[4..20].copy_from_slice(&auth);
        if tamper {
            reply[4] ^= 0xFF;
        }
        reply
    }

    async fn spawn_server(accept_password: &'static str, tamper: bool) -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let reply = server_reply(&buf[..len], accept_password, tamper);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        port
    }

    fn client(port: u16) -> UdpRadiusClient {
        UdpRadiusClient::new(
            RadiusSettings {
                server: "127.0.0.1".to_string(),
                port,
                nas_identifier: "portal-test".to_string(),
                timeout: Duration::from_millis(300),
                retries: 0,
            },
            Secret::new(SECRET.to_string()),
        )
    }

    #[test]
    fn test_packet_codec() {
        let packet = Packet {
            code: ACCESS_REQUEST,
            identifier: 42,
            authenticator: [7u8; 16],
            attributes: vec![(ATTR_USER_NAME, b"alice".to_vec())],
        };
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), 27);
        assert_eq!(&bytes[2..4], &27u16.to_be_bytes());
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);

        assert!(Packet::decode(&bytes[..10]).is_err());
        let mut corrupt = bytes.clone();
        corrupt[21] = 0;
        assert!(Packet::decode(&corrupt).is_err());
    }

    #[test]
    fn test_password_hiding_pads_to_block() {
        let auth = [1u8; 16];
        let hidden = hide_password(b"short", SECRET.as_bytes(), &auth).unwrap();
        assert_eq!(hidden.len(), 16);
        assert_eq!(
            reveal_password(&hidden, SECRET.as_bytes(), &auth),
            b"short".to_vec()
        );

        let long = "x".repeat(20);
        let hidden = hide_password(long.as_bytes(), SECRET.as_bytes(), &auth).unwrap();
        assert_eq!(hidden.len(), 32);
        assert_eq!(
            reveal_password(&hidden, SECRET.as_bytes(), &auth),
            long.into_bytes()
        );

        assert!(hide_password(&[b'a'; 129], SECRET.as_bytes(), &auth).is_err());
    }

    #[tokio::test]
    async fn test_access_accept_with_session_timeout() {
        let port = spawn_server("correct horse", false).await;
        let outcome = client(port)
            .authenticate("alice", "correct horse")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RadiusOutcome::Accept {
                session_timeout: Some(Duration::from_secs(1800)),
                reply_message: None,
            }
        );
    }

    #[tokio::test]
    async fn test_access_reject() {
        let port = spawn_server("correct horse", false).await;
        let outcome = client(port).authenticate("alice", "wrong").await.unwrap();
        assert_eq!(outcome, RadiusOutcome::Reject);
    }

    #[tokio::test]
    async fn test_bad_response_authenticator_is_protocol_error() {
        let port = spawn_server("correct horse", true).await;
        let result = client(port).authenticate("alice", "correct horse").await;
        assert!(matches!(result, Err(RadiusError::Protocol(_))));

        let backend = RadiusBackend::new(std::sync::Arc::new(client(port)));
        assert_eq!(
            backend
                .verify("alice", &Password::new("correct horse".to_string()))
                .await
                .unwrap_err(),
            BackendError::InvalidCredential
        );
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let result = client(port).authenticate("alice", "pw").await;
        assert_eq!(result, Err(RadiusError::Timeout));
        drop(silent);
    }
}

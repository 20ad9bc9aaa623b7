//! Remote sync API surface.
//!
//! The wire protocol is two endpoints: `GET /sync` returns the stored
//! snapshot, `POST /sync` replaces it. Both authenticate with an
//! `X-Api-Key` header. Payloads are strictly typed; a shape mismatch fails
//! the sync with a parse error instead of silently defaulting fields.
//!
//! Sensitive fields (password secrets, inline key material, host logins) are
//! sealed with the user's own cipher before they leave the machine, so the
//! remote only ever stores `v1:` blobs.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SyncError;
use crate::store::{Host, Key, Password};

/// Request timeout for sync calls.
const SYNC_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// A point-in-time copy of the remote credential state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Hosts, with sensitive fields sealed.
    #[serde(default)]
    pub hosts: Vec<Host>,
    /// Passwords, with secrets sealed.
    #[serde(default)]
    pub passwords: Vec<Password>,
    /// Keys, with inline material sealed.
    #[serde(default)]
    pub keys: Vec<Key>,
    /// Server-side timestamp of the last accepted push.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

/// Envelope wrapping every sync response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEnvelope {
    /// `"success"` or an error tag.
    pub status: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
    /// Snapshot payload, present on successful reads.
    #[serde(default)]
    pub data: Option<RemoteSnapshot>,
}

/// Body submitted on push.
#[derive(Debug, Serialize)]
struct PushBody<'a> {
    data: &'a RemoteSnapshot,
}

/// The remote store, specified at its interface only. Production uses
/// [`HttpRemote`]; tests script their own.
pub trait RemoteApi: Send {
    /// Performs an authenticated read of the remote snapshot.
    fn fetch(&self, token: &str) -> Result<RemoteSnapshot, SyncError>;

    /// Submits a snapshot as the new remote state.
    fn submit(&self, token: &str, snapshot: &RemoteSnapshot) -> Result<(), SyncError>;
}

/// Blocking HTTP implementation of [`RemoteApi`].
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRemote {
    /// Creates a client for the given service base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(SYNC_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn sync_url(&self) -> String {
        format!("{}/sync", self.base_url.trim_end_matches('/'))
    }
}

impl RemoteApi for HttpRemote {
    fn fetch(&self, token: &str) -> Result<RemoteSnapshot, SyncError> {
        debug!("pulling remote snapshot");
        let response = self
            .client
            .get(self.sync_url())
            .header("X-Api-Key", token)
            .send()?;

        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("HTTP {}", response.status())));
        }

        let envelope: SyncEnvelope = response.json()?;
        if envelope.status != "success" {
            return Err(SyncError::Remote(envelope.message));
        }

        envelope
            .data
            .ok_or_else(|| SyncError::Parse("success response without data".to_string()))
    }

    fn submit(&self, token: &str, snapshot: &RemoteSnapshot) -> Result<(), SyncError> {
        debug!(
            "pushing snapshot: {} hosts, {} passwords, {} keys",
            snapshot.hosts.len(),
            snapshot.passwords.len(),
            snapshot.keys.len()
        );
        let response = self
            .client
            .post(self.sync_url())
            .header("X-Api-Key", token)
            .json(&PushBody { data: snapshot })
            .send()?;

        if !response.status().is_success() {
            return Err(SyncError::Remote(format!("HTTP {}", response.status())));
        }
        Ok(())
    }
}

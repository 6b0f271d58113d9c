//! Signaling credential acquisition and renewal
//!
//! The [`TokenManager`] owns the only cached [`Credential`]. Fetching and
//! replacing happen under one async lock, so a renewed credential supersedes
//! the previous one atomically: callers never observe both as current.

use crate::config::CredentialRole;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Short-lived signaling credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque token embedded in the connection URI
    pub token: String,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential expiring `ttl` from now
    pub fn with_ttl(token: impl Into<String>, ttl: Duration) -> Self {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        Self {
            token: token.into(),
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Remaining lifetime, zero once expired
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the remaining lifetime has dropped below `floor`
    pub fn needs_renewal(&self, floor: Duration) -> bool {
        self.remaining() < floor
    }
}

/// Parameters sent to the credential issuer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRequest {
    /// Requested role
    pub role: CredentialRole,
    /// Optional channel name
    #[serde(rename = "channelName", skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
}

/// Issues signaling credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Fetch a fresh credential
    async fn fetch(&self, request: &CredentialRequest) -> Result<Credential>;
}

/// Credential issuer reached over REST
///
/// POSTs the [`CredentialRequest`] as JSON and accepts either an absolute
/// `expiresAt` (RFC 3339) or a relative `expiresIn` (seconds) in the reply.
pub struct HttpCredentialSource {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default, alias = "expires_at", rename = "expiresAt")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "expires_in", rename = "expiresIn")]
    expires_in: Option<u64>,
}

/// Lifetime assumed when the issuer omits an expiry
const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(60 * 60);

impl HttpCredentialSource {
    /// Create a source for `endpoint`, optionally authenticated with a bearer token
    pub fn new(endpoint: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self, request: &CredentialRequest) -> Result<Credential> {
        debug!(endpoint = %self.endpoint, role = request.role.as_str(), "Requesting signaling credential");

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(ref token) = self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::CredentialFetch(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CredentialFetch(format!(
                "Issuer returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::CredentialFetch(format!("Invalid issuer response: {}", e)))?;

        let credential = match (body.expires_at, body.expires_in) {
            (Some(expires_at), _) => Credential {
                token: body.token,
                expires_at,
            },
            (None, Some(secs)) => Credential::with_ttl(body.token, Duration::from_secs(secs)),
            (None, None) => Credential::with_ttl(body.token, DEFAULT_CREDENTIAL_TTL),
        };

        Ok(credential)
    }
}

/// Credential source that mints numbered tokens locally
///
/// Useful for development servers that accept any token, and for tests
/// that need to count fetches.
pub struct StaticCredentialSource {
    prefix: String,
    ttl: Duration,
    fetches: AtomicU64,
}

impl StaticCredentialSource {
    /// Mint tokens `"{prefix}-{n}"` that live for `ttl`
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            prefix: prefix.into(),
            ttl,
            fetches: AtomicU64::new(0),
        }
    }

    /// Number of credentials minted so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn fetch(&self, _request: &CredentialRequest) -> Result<Credential> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credential::with_ttl(format!("{}-{}", self.prefix, n), self.ttl))
    }
}

/// Caches and renews the signaling credential
///
/// # Example
///
/// ```
/// use encore_live_rooms::{CredentialRequest, CredentialRole, StaticCredentialSource, TokenManager};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let manager = TokenManager::new(
///     Arc::new(StaticCredentialSource::new("dev", Duration::from_secs(3600))),
///     CredentialRequest { role: CredentialRole::Audience, channel_name: None },
///     Duration::from_secs(1800),
/// );
///
/// let credential = manager.get_credential().await.unwrap();
/// assert_eq!(credential.token, "dev-1");
/// assert!(!manager.renew_if_expiring().await.unwrap());
/// # });
/// ```
pub struct TokenManager {
    source: Arc<dyn CredentialSource>,
    request: CredentialRequest,
    renewal_floor: Duration,
    cached: Mutex<Option<Credential>>,
}

impl TokenManager {
    /// Create a manager over `source`
    ///
    /// # Arguments
    ///
    /// * `source` - Credential issuer
    /// * `request` - Role/channel sent on every fetch
    /// * `renewal_floor` - Remaining lifetime below which a credential is replaced
    pub fn new(
        source: Arc<dyn CredentialSource>,
        request: CredentialRequest,
        renewal_floor: Duration,
    ) -> Self {
        Self {
            source,
            request,
            renewal_floor,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached credential, fetching a new one if absent or expiring
    pub async fn get_credential(&self) -> Result<Credential> {
        let mut cached = self.cached.lock().await;

        if let Some(ref credential) = *cached {
            if !credential.needs_renewal(self.renewal_floor) {
                return Ok(credential.clone());
            }
            debug!(
                remaining_secs = credential.remaining().as_secs(),
                "Cached credential is expiring, fetching a new one"
            );
        }

        let credential = self.source.fetch(&self.request).await?;
        info!(expires_at = %credential.expires_at, "Signaling credential acquired");
        *cached = Some(credential.clone());
        Ok(credential)
    }

    /// Renew the credential if it is absent or below the renewal floor
    ///
    /// Returns `true` when a new credential replaced the cached one. Fetch
    /// failures are returned to the caller; nothing here retries.
    pub async fn renew_if_expiring(&self) -> Result<bool> {
        let mut cached = self.cached.lock().await;

        let expiring = match *cached {
            Some(ref credential) => credential.needs_renewal(self.renewal_floor),
            None => return Ok(false),
        };
        if !expiring {
            return Ok(false);
        }

        match self.source.fetch(&self.request).await {
            Ok(credential) => {
                info!(expires_at = %credential.expires_at, "Signaling credential renewed");
                *cached = Some(credential);
                Ok(true)
            }
            Err(e) => {
                warn!("Credential renewal failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the cached credential so the next `get_credential` fetches
    pub async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            info!("Signaling credential invalidated");
        }
    }

    /// Currently cached credential, if any
    pub async fn cached(&self) -> Option<Credential> {
        self.cached.lock().await.clone()
    }
}

use arc_swap::ArcSwap;
use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Request};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    siwe::{SessionSigner, SiweMessage},
    token::{AuthToken, SessionRequest, TokenResponse},
    usage::{UsageBackend, UsageBackendKind},
    SessionError,
};
use crate::{
    metrics::MetricsSink,
    upstream::{affinity::affinity_index, HttpTransport},
};

/// Lifetime requested for the sign-in message itself.
const SIGN_IN_VALIDITY: chrono::Duration = chrono::Duration::minutes(1);

/// Shortest delay between two renewals of the same slot.
const MIN_RENEW_DELAY: Duration = Duration::from_secs(1);

/// Session client definition.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionClientConfig {
    pub name: String,
    /// Endpoint accepting signed sign-in messages.
    pub auth_url: String,
    /// Hex-encoded secp256k1 private key.
    pub private_key: String,
    /// Number of credentials kept in the pool.
    #[serde(default = "default_session_count")]
    pub session_count: i64,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub usage_backend: UsageBackendKind,
    /// Uses drawn from the shared counter per refill when `usage_backend = "shared"`.
    #[serde(default = "default_usage_batch_size")]
    pub usage_batch_size: i64,
    /// Retry delay after a slot failed to acquire its first credential.
    #[serde(default = "default_acquire_retry_seconds")]
    pub acquire_retry_seconds: u64,
    /// Retry delay after a renewal failed.
    #[serde(default = "default_renew_retry_seconds")]
    pub renew_retry_seconds: u64,
    /// How long before expiration a credential is renewed.
    #[serde(default = "default_renew_before_seconds")]
    pub renew_before_seconds: u64,
    /// Pool slots tried by `sign` before giving up.
    #[serde(default = "default_sign_attempts")]
    pub sign_attempts: usize,
}

fn default_session_count() -> i64 {
    1
}

fn default_chain_id() -> u64 {
    1
}

fn default_usage_batch_size() -> i64 {
    10
}

fn default_acquire_retry_seconds() -> u64 {
    15
}

fn default_renew_retry_seconds() -> u64 {
    60
}

fn default_renew_before_seconds() -> u64 {
    5
}

fn default_sign_attempts() -> usize {
    10
}

impl SessionClientConfig {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        auth_url: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            auth_url: auth_url.into(),
            private_key: private_key.into(),
            session_count: default_session_count(),
            chain_id: default_chain_id(),
            statement: String::new(),
            usage_backend: UsageBackendKind::default(),
            usage_batch_size: default_usage_batch_size(),
            acquire_retry_seconds: default_acquire_retry_seconds(),
            renew_retry_seconds: default_renew_retry_seconds(),
            renew_before_seconds: default_renew_before_seconds(),
            sign_attempts: default_sign_attempts(),
        }
    }

    /// Domain (`host[:port]`) announced in the sign-in message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] when `auth_url` is not an absolute URL.
    pub fn domain(&self) -> Result<String, SessionError> {
        let url = url::Url::parse(&self.auth_url)
            .map_err(|e| SessionError::InvalidConfig(format!("invalid auth_url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| SessionError::InvalidConfig("auth_url has no host".into()))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a bad URL, non-positive session count,
    /// zero sign attempts, or non-positive shared batch size.
    pub fn validate(&self) -> Result<(), SessionError> {
        self.domain()?;
        if self.session_count <= 0 {
            return Err(SessionError::InvalidConfig("session_count must be > 0".into()));
        }
        if self.sign_attempts == 0 {
            return Err(SessionError::InvalidConfig("sign_attempts must be > 0".into()));
        }
        if self.usage_backend == UsageBackendKind::Shared && self.usage_batch_size <= 0 {
            return Err(SessionError::InvalidConfig("usage_batch_size must be > 0".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClientConfig")
            .field("name", &self.name)
            .field("auth_url", &self.auth_url)
            .field("private_key", &"<redacted>")
            .field("session_count", &self.session_count)
            .field("chain_id", &self.chain_id)
            .field("usage_backend", &self.usage_backend)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a [`SessionAuthClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ClientState {
    Uninitialized = 0,
    Starting = 1,
    Running = 2,
    Stopped = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

struct Session {
    domain: String,
    signer: SessionSigner,
}

struct ClientInner {
    config: SessionClientConfig,
    transport: Arc<dyn HttpTransport>,
    usage: UsageBackend,
    metrics: Arc<dyn MetricsSink>,
    state: AtomicU8,
    session: OnceLock<Session>,
    slots: OnceLock<Vec<ArcSwap<AuthToken>>>,
    error: Mutex<Option<SessionError>>,
    cancel: CancellationToken,
}

/// Pool of SIWE session credentials with background renewal.
///
/// Cloning yields another handle to the same pool.
#[derive(Clone)]
pub struct SessionAuthClient {
    inner: Arc<ClientInner>,
}

impl SessionAuthClient {
    #[must_use]
    pub fn new(
        config: SessionClientConfig,
        transport: Arc<dyn HttpTransport>,
        usage: UsageBackend,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                usage,
                metrics,
                state: AtomicU8::new(ClientState::Uninitialized as u8),
                session: OnceLock::new(),
                slots: OnceLock::new(),
                error: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Validates the configuration and acquires one credential per pool slot.
    ///
    /// Slots that fail to acquire get an expired placeholder and retry in the background, so
    /// `start` only fails on configuration errors.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] on a second call,
    /// [`SessionError::InvalidConfig`] or [`SessionError::InvalidKey`] for unusable settings,
    /// and [`SessionError::SessionClosed`] when [`stop`](Self::stop) ran before start finished.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(
                ClientState::Uninitialized as u8,
                ClientState::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SessionError::AlreadyStarted);
        }

        let session = match inner.config.validate().and_then(|()| {
            Ok(Session {
                domain: inner.config.domain()?,
                signer: SessionSigner::from_hex(&inner.config.private_key)?,
            })
        }) {
            Ok(session) => session,
            Err(e) => {
                inner.state.store(ClientState::Stopped as u8, Ordering::Release);
                *inner.error.lock() = Some(e.clone());
                return Err(e);
            }
        };
        let _ = inner.session.set(session);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let count = inner.config.session_count as usize;
        let mut slots = Vec::with_capacity(count);
        let mut pending = Vec::new();
        for slot in 0..count {
            match inner.acquire(slot).await {
                Ok(token) => {
                    pending.push((slot, inner.renewal_delay(&token)));
                    slots.push(ArcSwap::from_pointee(token));
                }
                Err(e) => {
                    warn!(client = %inner.config.name, slot, error = %e, "initial session acquisition failed");
                    pending.push((slot, Some(inner.acquire_retry())));
                    slots.push(ArcSwap::from_pointee(AuthToken::expired(e)));
                }
            }
        }
        let _ = inner.slots.set(slots);

        for (slot, delay) in pending {
            if let Some(delay) = delay {
                Arc::clone(inner).schedule(slot, delay);
            }
        }

        if inner
            .state
            .compare_exchange(
                ClientState::Starting as u8,
                ClientState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            info!(client = %inner.config.name, "session client stopped during start");
            return Err(SessionError::SessionClosed);
        }
        info!(client = %inner.config.name, slots = count, "session client started");
        Ok(())
    }

    /// Stops renewal. The client cannot be restarted.
    pub fn stop(&self) {
        let inner = &self.inner;
        inner.state.store(ClientState::Stopped as u8, Ordering::Release);
        if !inner.cancel.is_cancelled() {
            inner.cancel.cancel();
            inner.store_error(SessionError::SessionClosed);
            info!(client = %inner.config.name, "session client stopped");
        }
    }

    /// Attaches a usable credential to `request`.
    ///
    /// # Errors
    ///
    /// See [`Self::sign_headers`].
    pub async fn sign<B>(&self, request: &mut Request<B>) -> Result<(), SessionError> {
        self.sign_headers(request.headers_mut()).await
    }

    /// Picks a credential by session affinity, consumes one use and copies its headers onto
    /// `headers`. Unusable slots are skipped in order, up to the configured attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] or [`SessionError::SessionClosed`] outside the
    /// running state, otherwise the last credential error once all attempts fail.
    pub async fn sign_headers(&self, headers: &mut HeaderMap) -> Result<(), SessionError> {
        let inner = &self.inner;
        match self.state() {
            ClientState::Running => {}
            ClientState::Stopped => return Err(SessionError::SessionClosed),
            ClientState::Uninitialized | ClientState::Starting => {
                return Err(SessionError::NotStarted)
            }
        }
        let slots = inner.slots.get().ok_or(SessionError::NotStarted)?;
        let base = affinity_index(headers, slots.len()).ok_or(SessionError::NoTokensAvailable)?;

        let mut last_error = SessionError::NoTokensAvailable;
        for attempt in 0..inner.config.sign_attempts {
            let slot = (base + attempt) % slots.len();
            let token = slots[slot].load_full();
            match token.consume().await {
                Ok(()) => {
                    token.apply(headers);
                    return Ok(());
                }
                Err(e) => {
                    debug!(client = %inner.config.name, slot, error = %e, "session slot unusable");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Client-level health: the stored terminal error, or
    /// [`SessionError::NoTokensAvailable`] when no pooled credential passes `peek`.
    #[must_use]
    pub fn error(&self) -> Option<SessionError> {
        let inner = &self.inner;
        if let Some(error) = inner.error.lock().clone() {
            return Some(error);
        }
        let Some(slots) = inner.slots.get() else {
            return Some(SessionError::NotStarted);
        };
        if slots.iter().all(|slot| slot.load().peek().is_err()) {
            return Some(SessionError::NoTokensAvailable);
        }
        None
    }

    /// Current credential of `slot`.
    #[must_use]
    pub fn token(&self, slot: usize) -> Option<Arc<AuthToken>> {
        self.inner.slots.get().and_then(|slots| slots.get(slot)).map(ArcSwap::load_full)
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.inner.slots.get().map_or(0, Vec::len)
    }
}

impl fmt::Debug for SessionAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuthClient")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn acquire_retry(&self) -> Duration {
        Duration::from_secs(self.config.acquire_retry_seconds)
    }

    fn renew_retry(&self) -> Duration {
        Duration::from_secs(self.config.renew_retry_seconds)
    }

    fn renewal_delay(&self, token: &AuthToken) -> Option<Duration> {
        token
            .renew_in(Duration::from_secs(self.config.renew_before_seconds), Utc::now())
            .map(|delay| delay.max(MIN_RENEW_DELAY))
    }

    fn store_error(&self, error: SessionError) {
        let mut stored = self.error.lock();
        if stored.is_none() {
            *stored = Some(error);
        }
    }

    /// Signs a fresh sign-in message and exchanges it for a credential.
    async fn acquire(&self, slot: usize) -> Result<AuthToken, SessionError> {
        let session = self.session.get().ok_or(SessionError::NotStarted)?;
        let now = Utc::now();
        let message = SiweMessage::new(
            session.domain.clone(),
            session.signer.address(),
            self.config.auth_url.clone(),
            self.config.chain_id,
            now,
        )
        .with_statement(self.config.statement.clone())
        .with_expiration(now + SIGN_IN_VALIDITY);

        let msg = message.to_string();
        let sig = session.signer.sign_message(&msg)?;
        let body = serde_json::to_vec(&SessionRequest { msg, sig })
            .map_err(|e| SessionError::InvalidResponse(e.to_string()))?;

        let result = self.exchange(Bytes::from(body)).await;
        self.metrics.record_session_acquisition(&self.config.name, result.is_ok());
        match &result {
            Ok(token) => debug!(
                client = %self.config.name,
                slot,
                expiration = ?token.expiration(),
                "session credential acquired"
            ),
            Err(e) => debug!(client = %self.config.name, slot, error = %e, "session acquisition failed"),
        }
        result
    }

    async fn exchange(&self, body: Bytes) -> Result<AuthToken, SessionError> {
        let response = self
            .transport
            .post(&self.config.auth_url, &HeaderMap::new(), body)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let bytes = response.error_for_status().map_err(|e| SessionError::Transport(e.to_string()))?;
        let parsed: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::InvalidResponse(format!("Invalid JSON: {e}")))?;
        AuthToken::from_response(parsed, &self.usage).await
    }

    /// Renews `slot` after `delay`, rescheduling itself until the client stops.
    fn schedule(self: Arc<Self>, slot: usize, delay: Duration) {
        tokio::spawn(async move {
            let mut delay = delay;
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        self.store_error(SessionError::SessionClosed);
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                let Some(slots) = self.slots.get() else {
                    break;
                };
                let placeholder = slots[slot].load().error().is_some();

                let acquired = tokio::select! {
                    () = self.cancel.cancelled() => {
                        self.store_error(SessionError::SessionClosed);
                        break;
                    }
                    acquired = self.acquire(slot) => acquired,
                };

                match acquired {
                    Ok(token) => {
                        let next = self.renewal_delay(&token);
                        slots[slot].store(Arc::new(token));
                        match next {
                            Some(next) => delay = next,
                            None => break,
                        }
                    }
                    Err(e) => {
                        delay = if placeholder { self.acquire_retry() } else { self.renew_retry() };
                        warn!(
                            client = %self.config.name,
                            slot,
                            error = %e,
                            retry_in_secs = delay.as_secs(),
                            "session renewal failed"
                        );
                    }
                }
            }
        });
    }
}

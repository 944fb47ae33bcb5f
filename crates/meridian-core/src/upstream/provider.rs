use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Instant,
};

use super::{
    chain::{block_number_from_response, ChainRuntime},
    http_client::HttpTransport,
    UpstreamError,
};
use crate::types::JsonRpcResponse;

/// Definition of one upstream RPC endpoint, as it appears in configuration files and
/// registry snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Dial target (`host:port`). Derived from `url` when omitted.
    #[serde(default)]
    pub host: Option<String>,

    /// HTTP(S) endpoint polled by health checks.
    pub url: String,

    /// Path the proxied request is rewritten to. Defaults to the path of `url`.
    #[serde(default)]
    pub path: Option<String>,

    /// Extra headers attached to every request sent to this provider.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Priority tier; lower numbers are preferred.
    #[serde(default)]
    pub priority: u32,

    /// First block the provider serves, for pruned nodes.
    #[serde(default)]
    pub earliest_block: Option<u64>,
}

impl ProviderConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            host: None,
            url: url.into(),
            path: None,
            headers: BTreeMap::new(),
            priority: 0,
            earliest_block: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Resolves the dial target: the explicit `host`, or `host[:port]` of the URL.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] when the URL cannot be parsed or has no host.
    pub fn resolve_host(&self) -> Result<String, UpstreamError> {
        if let Some(host) = self.host.as_ref().filter(|h| !h.is_empty()) {
            return Ok(host.clone());
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| UpstreamError::InvalidConfig(format!("invalid provider url: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| UpstreamError::InvalidConfig("provider url has no host".into()))?;
        Ok(match parsed.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    fn resolve_path(&self) -> Result<String, UpstreamError> {
        if let Some(path) = self.path.as_ref().filter(|p| !p.is_empty()) {
            return Ok(path.clone());
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| UpstreamError::InvalidConfig(format!("invalid provider url: {e}")))?;
        Ok(parsed.path().to_string())
    }

    fn header_map(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                UpstreamError::InvalidConfig(format!("invalid header name: {name}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                UpstreamError::InvalidConfig(format!("invalid value for header {name}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

/// Health classification of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Gauge value used for metrics: 1 healthy, 0.5 warning, 0 unhealthy.
    #[must_use]
    pub fn as_gauge_value(&self) -> f64 {
        match self {
            Self::Healthy => 1.0,
            Self::Warning => 0.5,
            Self::Unhealthy => 0.0,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable health state, all fields updated under one lock so transitions are atomic.
#[derive(Debug, Clone)]
struct HealthState {
    healthy: bool,
    failures: u32,
    successes: u32,
    status: HealthStatus,
    last_error: Option<String>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            healthy: false,
            failures: 0,
            successes: 0,
            status: HealthStatus::Unhealthy,
            last_error: None,
        }
    }
}

/// Outcome of one chain-head poll.
#[derive(Debug, Clone)]
pub struct HeadPoll {
    /// HTTP status, when the provider answered at all.
    pub status: Option<u16>,
    pub block: Result<u64, UpstreamError>,
    pub latency_ms: u64,
}

/// Point-in-time view of a provider for admin reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub host: String,
    pub priority: u32,
    pub status: HealthStatus,
    pub healthy: bool,
    pub reachable: bool,
    pub available: bool,
    pub failures: u32,
    pub successes: u32,
    pub latest_block: Option<u64>,
    pub earliest_block: Option<u64>,
    pub last_error: Option<String>,
}

/// One upstream RPC endpoint of a network.
///
/// Health state is written only by the owning network's health-check round and read
/// concurrently by request-time selection. The hysteresis flag (`healthy`) moves only when
/// consecutive outcomes cross the threshold; chain-state classifications (`mark_warning`,
/// `mark_unhealthy`, `mark_healthy`) apply immediately.
pub struct Provider {
    config: ProviderConfig,
    host: String,
    path: String,
    headers: HeaderMap,
    state: RwLock<HealthState>,
    /// Whether the connection target answered the last time it was contacted.
    reachable: AtomicBool,
    /// Latest observed block, `0` until the first successful poll.
    latest_block: AtomicU64,
}

impl Provider {
    /// Creates a provider in the initial `Unhealthy` state.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] for unparsable URLs or header definitions.
    pub fn new(config: ProviderConfig) -> Result<Self, UpstreamError> {
        let host = config.resolve_host()?;
        let path = config.resolve_path()?;
        let headers = config.header_map()?;
        Ok(Self {
            config,
            host,
            path,
            headers,
            state: RwLock::new(HealthState::default()),
            reachable: AtomicBool::new(true),
            latest_block: AtomicU64::new(0),
        })
    }

    /// Builds a provider from an updated definition while keeping this provider's health
    /// state and observed chain head.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] for unparsable URLs or header definitions.
    pub fn rebuild(&self, config: ProviderConfig) -> Result<Self, UpstreamError> {
        let rebuilt = Self::new(config)?;
        *rebuilt.state.write() = self.state.read().clone();
        rebuilt.reachable.store(self.reachable.load(Ordering::Relaxed), Ordering::Relaxed);
        rebuilt.latest_block.store(self.latest_block.load(Ordering::Relaxed), Ordering::Relaxed);
        Ok(rebuilt)
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    /// Consecutive failure count.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.state.read().failures
    }

    /// Consecutive success count.
    #[must_use]
    pub fn successes(&self) -> u32 {
        self.state.read().successes
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.state.read().status
    }

    /// Healthy flag set and no warning or unhealthy classification in effect.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let state = self.state.read();
        state.healthy && state.status == HealthStatus::Healthy
    }

    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Reachable connection target and healthy chain state. Both are required.
    #[must_use]
    pub fn available(&self) -> bool {
        self.is_reachable() && self.is_healthy()
    }

    /// Latest observed block, if any poll has succeeded.
    #[must_use]
    pub fn latest_block_number(&self) -> Option<u64> {
        match self.latest_block.load(Ordering::Acquire) {
            0 => None,
            block => Some(block),
        }
    }

    pub fn set_latest_block_number(&self, block: u64) {
        self.latest_block.store(block, Ordering::Release);
    }

    #[must_use]
    pub fn earliest_block_number(&self) -> Option<u64> {
        self.config.earliest_block
    }

    /// Whether the provider is known to hold `block`.
    ///
    /// Requires an observed head; pruned providers also need `block >= earliest_block`.
    #[must_use]
    pub fn can_serve_block(&self, block: u64) -> bool {
        let Some(latest) = self.latest_block_number() else {
            return false;
        };
        let above_floor = self.config.earliest_block.map_or(true, |earliest| block >= earliest);
        above_floor && block <= latest
    }

    /// Transport failure with hysteresis: unhealthy once `failures > threshold`.
    pub fn mark_ping_failure(&self, threshold: u32, error: &UpstreamError) {
        let mut state = self.state.write();
        state.failures = state.failures.saturating_add(1);
        state.successes = 0;
        state.last_error = Some(error.to_string());
        if state.failures > threshold && state.healthy {
            tracing::warn!(
                provider = %self.host,
                failures = state.failures,
                error = %error,
                "provider marked unhealthy after consecutive failures"
            );
        }
        if state.failures > threshold {
            state.healthy = false;
            state.status = HealthStatus::Unhealthy;
        }
    }

    /// Success with hysteresis: healthy once `successes > threshold`.
    pub fn mark_ping_success(&self, threshold: u32) {
        let mut state = self.state.write();
        state.successes = state.successes.saturating_add(1);
        if state.successes > threshold {
            if !state.healthy {
                tracing::info!(
                    provider = %self.host,
                    successes = state.successes,
                    "provider recovered after consecutive successes"
                );
            }
            state.healthy = true;
            state.status = HealthStatus::Healthy;
            state.failures = 0;
            state.last_error = None;
        }
    }

    /// Soft warning for rate-limited polls. Counters are left untouched.
    pub fn mark_ping_warning(&self) {
        let mut state = self.state.write();
        state.status = HealthStatus::Warning;
        state.last_error = Some("rate limited".to_string());
    }

    /// Immediate warning from chain-state comparison (lagging head).
    pub fn mark_warning(&self) {
        self.state.write().status = HealthStatus::Warning;
    }

    /// Immediate removal from rotation (implausible head).
    pub fn mark_unhealthy(&self) {
        let mut state = self.state.write();
        state.healthy = false;
        state.successes = 0;
        state.status = HealthStatus::Unhealthy;
    }

    /// Immediate healthy classification. Seeds the success counter past `threshold` so the
    /// next hysteresis step agrees with this classification.
    pub fn mark_healthy(&self, threshold: u32) {
        let mut state = self.state.write();
        state.healthy = true;
        state.status = HealthStatus::Healthy;
        state.failures = 0;
        state.successes = state.successes.max(threshold.saturating_add(1));
        state.last_error = None;
    }

    /// Polls the provider's chain head with `method`.
    ///
    /// Connection-level failures mark the target unreachable; any HTTP answer marks it
    /// reachable even when the status is an error. Local permit exhaustion leaves
    /// reachability untouched. Bodies over `max_payload_size` are cut off mid-read.
    pub async fn fetch_latest_block_number(
        &self,
        transport: &dyn HttpTransport,
        runtime: ChainRuntime,
        method: &str,
        max_payload_size: usize,
    ) -> HeadPoll {
        let start = Instant::now();
        let request = runtime.head_request(method);

        let body = match serde_json::to_vec(&request) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                return HeadPoll {
                    status: None,
                    block: Err(UpstreamError::InvalidRequest(e.to_string())),
                    latency_ms: 0,
                }
            }
        };

        let response =
            transport.post_limited(&self.config.url, &self.headers, body, max_payload_size).await;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => {
                self.set_reachable(true);
                response
            }
            Err(e) => {
                if e.is_unreachable() {
                    self.set_reachable(false);
                } else if matches!(e, UpstreamError::PayloadTooLarge(..)) {
                    self.set_reachable(true);
                }
                return HeadPoll { status: None, block: Err(e), latency_ms };
            }
        };

        let status = response.status;
        let block = response.error_for_status().and_then(|bytes| {
            let decoded: JsonRpcResponse = serde_json::from_slice(&bytes)
                .map_err(|e| UpstreamError::InvalidResponse(format!("Invalid JSON: {e}")))?;
            block_number_from_response(&decoded)
        });

        HeadPoll { status: Some(status), block, latency_ms }
    }

    #[must_use]
    pub fn snapshot(&self) -> ProviderStatus {
        let state = self.state.read().clone();
        let reachable = self.is_reachable();
        let healthy = state.healthy && state.status == HealthStatus::Healthy;
        ProviderStatus {
            host: self.host.clone(),
            priority: self.config.priority,
            status: state.status,
            healthy,
            reachable,
            available: reachable && healthy,
            failures: state.failures,
            successes: state.successes,
            latest_block: self.latest_block_number(),
            earliest_block: self.config.earliest_block,
            last_error: state.last_error,
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("host", &self.host)
            .field("priority", &self.config.priority)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

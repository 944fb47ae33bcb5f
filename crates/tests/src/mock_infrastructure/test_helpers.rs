//! Shared fixtures: a recording metrics sink, a call-counting transport, and network builders.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use meridian_core::{
    metrics::MetricsSink,
    upstream::{
        ChainRuntime, HealthCheckConfig, HealthStatus, HttpClient, HttpResponse, HttpTransport,
        Network, NetworkConfig, ProviderConfig, UpstreamError,
    },
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Private key whose EIP-55 address is [`TEST_ADDRESS`].
pub const TEST_PRIVATE_KEY: &str =
    "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub const TEST_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";

/// One `record_health_check` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckRecord {
    pub network: String,
    pub provider: String,
    pub status: u16,
    pub health: HealthStatus,
    pub block_number: u64,
}

/// [`MetricsSink`] that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub health_checks: Mutex<Vec<HealthCheckRecord>>,
    pub latest_blocks: Mutex<Vec<(String, u64)>>,
    pub acquisitions: Mutex<Vec<(String, bool)>>,
    pub requests: Mutex<Vec<(String, String, u16)>>,
}

impl RecordingMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Health-check records for `provider`, oldest first.
    #[must_use]
    pub fn checks_for(&self, provider: &str) -> Vec<HealthCheckRecord> {
        self.health_checks.lock().iter().filter(|r| r.provider == provider).cloned().collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_request(
        &self,
        _service: &str,
        method: &str,
        _provider: &str,
        host: &str,
        status: u16,
        _health_status: HealthStatus,
    ) {
        self.requests.lock().push((method.to_string(), host.to_string(), status));
    }

    fn record_health_check(
        &self,
        network: &str,
        provider: &str,
        status: u16,
        health_status: HealthStatus,
        block_number: u64,
    ) {
        self.health_checks.lock().push(HealthCheckRecord {
            network: network.to_string(),
            provider: provider.to_string(),
            status,
            health: health_status,
            block_number,
        });
    }

    fn record_network_latest_block(&self, network: &str, block_number: u64) {
        self.latest_blocks.lock().push((network.to_string(), block_number));
    }

    fn record_session_acquisition(&self, client: &str, success: bool) {
        self.acquisitions.lock().push((client.to_string(), success));
    }
}

/// Transport wrapper counting the requests it forwards.
pub struct CountingTransport {
    inner: Arc<dyn HttpTransport>,
    calls: AtomicUsize,
}

impl CountingTransport {
    #[must_use]
    pub fn new(inner: Arc<dyn HttpTransport>) -> Arc<Self> {
        Arc::new(Self { inner, calls: AtomicUsize::new(0) })
    }

    /// Counting wrapper around a default `reqwest` client.
    #[must_use]
    pub fn http() -> Arc<Self> {
        Self::new(http_transport())
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for CountingTransport {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.post(url, headers, body).await
    }

    async fn post_limited(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        max_body: usize,
    ) -> Result<HttpResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.post_limited(url, headers, body, max_body).await
    }
}

/// Default `reqwest` transport.
#[must_use]
pub fn http_transport() -> Arc<dyn HttpTransport> {
    Arc::new(HttpClient::new().unwrap())
}

/// Health-check policy with defaults except for `threshold` and `block_lag_limit`.
#[must_use]
pub fn health_config(threshold: u32, block_lag_limit: u64) -> HealthCheckConfig {
    HealthCheckConfig { threshold, block_lag_limit, ..HealthCheckConfig::default() }
}

/// Ethereum network over `urls`, polled through a real HTTP client.
#[must_use]
pub fn ethereum_network(
    urls: &[String],
    health: HealthCheckConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Arc<Network> {
    network(ChainRuntime::Ethereum, urls, health, metrics)
}

#[must_use]
pub fn network(
    runtime: ChainRuntime,
    urls: &[String],
    health: HealthCheckConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Arc<Network> {
    let mut config = NetworkConfig::new(runtime.as_str(), runtime);
    for url in urls {
        config = config.with_provider(ProviderConfig::new(url.clone()));
    }
    Arc::new(Network::new(config, health, http_transport(), metrics).unwrap())
}

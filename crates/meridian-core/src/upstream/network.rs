use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    chain::ChainRuntime,
    history::{CheckedProviders, REFERENCE_PERCENTILE},
    http_client::HttpTransport,
    provider::{HeadPoll, HealthStatus, Provider, ProviderConfig, ProviderStatus},
    provider_set::ProviderSet,
    UpstreamError,
};
use crate::metrics::MetricsSink;

/// Health-check policy shared by every network unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Seconds between health-check rounds.
    pub interval_seconds: u64,
    /// Consecutive identical outcomes needed to flip the hysteresis flag is `threshold + 1`.
    pub threshold: u32,
    /// Blocks a provider may trail the reference before it is put into warning.
    pub block_lag_limit: u64,
    /// Maximum distance from the reference block before a head is considered implausible.
    pub block_number_delta: u64,
    /// Largest accepted health-check response body in bytes.
    pub max_payload_size: usize,
    /// Attempts the hosting proxy makes per request before giving up.
    pub request_attempts: u32,
    /// Mark providers whose newest sample trails the network head as warning after each round.
    pub evaluate_checked_providers: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            threshold: 1,
            block_lag_limit: 10,
            block_number_delta: 1000,
            max_payload_size: 10 * 1024 * 1024,
            request_attempts: 3,
            evaluate_checked_providers: true,
        }
    }
}

impl HealthCheckConfig {
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] for a zero interval, payload limit or
    /// attempt count.
    pub fn validate(&self) -> Result<(), UpstreamError> {
        if self.interval_seconds == 0 {
            return Err(UpstreamError::InvalidConfig("interval_seconds must be > 0".into()));
        }
        if self.max_payload_size == 0 {
            return Err(UpstreamError::InvalidConfig("max_payload_size must be > 0".into()));
        }
        if self.request_attempts == 0 {
            return Err(UpstreamError::InvalidConfig("request_attempts must be > 0".into()));
        }
        Ok(())
    }
}

/// Per-network overrides of [`HealthCheckConfig`]; unset fields keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckOverrides {
    pub interval_seconds: Option<u64>,
    pub threshold: Option<u32>,
    pub block_lag_limit: Option<u64>,
    pub block_number_delta: Option<u64>,
    pub max_payload_size: Option<usize>,
    pub request_attempts: Option<u32>,
    pub evaluate_checked_providers: Option<bool>,
}

impl HealthCheckOverrides {
    #[must_use]
    pub fn apply(&self, base: &HealthCheckConfig) -> HealthCheckConfig {
        HealthCheckConfig {
            interval_seconds: self.interval_seconds.unwrap_or(base.interval_seconds),
            threshold: self.threshold.unwrap_or(base.threshold),
            block_lag_limit: self.block_lag_limit.unwrap_or(base.block_lag_limit),
            block_number_delta: self.block_number_delta.unwrap_or(base.block_number_delta),
            max_payload_size: self.max_payload_size.unwrap_or(base.max_payload_size),
            request_attempts: self.request_attempts.unwrap_or(base.request_attempts),
            evaluate_checked_providers: self
                .evaluate_checked_providers
                .unwrap_or(base.evaluate_checked_providers),
        }
    }
}

/// Static definition of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    #[serde(default)]
    pub runtime: ChainRuntime,
    /// RPC method polled for the chain head; defaults per runtime.
    #[serde(default)]
    pub health_check_method: Option<String>,
    #[serde(default)]
    pub health_check: HealthCheckOverrides,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl NetworkConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, runtime: ChainRuntime) -> Self {
        Self {
            name: name.into(),
            runtime,
            health_check_method: None,
            health_check: HealthCheckOverrides::default(),
            providers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }
}

/// Effective settings of a network after overrides; swapped atomically on registry updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub health_check_method: String,
    pub health: HealthCheckConfig,
}

/// Provider changes made by one registry descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DescriptorChanges {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Point-in-time view of a network for admin reporting.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub name: String,
    pub runtime: ChainRuntime,
    pub health_check_method: String,
    pub interval_seconds: u64,
    pub request_attempts: u32,
    pub latest_block: u64,
    pub available_providers: usize,
    pub providers: Vec<ProviderStatus>,
}

/// A logical chain served by several providers plus its health-check loop.
///
/// Rounds are serialized by `round_lock`, so a slow round delays the next one instead of
/// overlapping it. `latest_block` only moves forward.
pub struct Network {
    name: String,
    runtime: ChainRuntime,
    defaults: HealthCheckConfig,
    settings: ArcSwap<NetworkSettings>,
    providers: ProviderSet,
    checked: CheckedProviders,
    latest_block: AtomicU64,
    transport: Arc<dyn HttpTransport>,
    metrics: Arc<dyn MetricsSink>,
    round_lock: Mutex<()>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl Network {
    /// Builds a network and its providers from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] for an empty name, unusable provider
    /// definitions, duplicate provider hosts, or invalid health-check settings.
    pub fn new(
        config: NetworkConfig,
        defaults: HealthCheckConfig,
        transport: Arc<dyn HttpTransport>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, UpstreamError> {
        if config.name.trim().is_empty() {
            return Err(UpstreamError::InvalidConfig("network name must not be empty".into()));
        }
        let settings = resolve_settings(
            config.runtime,
            config.health_check_method.as_deref(),
            &config.health_check,
            &defaults,
        )?;
        let providers = build_providers(&config.providers)?;

        let set = ProviderSet::new();
        for provider in providers {
            set.upsert(Arc::new(provider));
        }

        Ok(Self {
            name: config.name,
            runtime: config.runtime,
            defaults,
            settings: ArcSwap::from_pointee(settings),
            providers: set,
            checked: CheckedProviders::new(),
            latest_block: AtomicU64::new(0),
            transport,
            metrics,
            round_lock: Mutex::new(()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn runtime(&self) -> ChainRuntime {
        self.runtime
    }

    #[must_use]
    pub fn settings(&self) -> Arc<NetworkSettings> {
        self.settings.load_full()
    }

    /// Attempts the hosting proxy should make per request.
    #[must_use]
    pub fn request_attempts(&self) -> u32 {
        self.settings.load().health.request_attempts
    }

    #[must_use]
    pub fn providers(&self) -> Arc<Vec<Arc<Provider>>> {
        self.providers.snapshot()
    }

    #[must_use]
    pub fn provider(&self, host: &str) -> Option<Arc<Provider>> {
        self.providers.get(host)
    }

    #[must_use]
    pub fn checked_providers(&self) -> &CheckedProviders {
        &self.checked
    }

    /// Network-wide chain head; `0` before any successful round.
    #[must_use]
    pub fn latest_block_number(&self) -> u64 {
        self.latest_block.load(Ordering::Acquire)
    }

    /// Raises the network head to `block` if it is higher. Returns the resulting head.
    pub fn observe_block(&self, block: u64) -> u64 {
        self.latest_block.fetch_max(block, Ordering::AcqRel).max(block)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Spawns the health-check loop. The first round runs immediately; later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let network = Arc::clone(self);
        let cancel = self.cancel.clone();
        info!(network = %self.name, providers = self.providers.len(), "starting health checks");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = network.run_health_check_round() => {}
                }
                let interval = Duration::from_secs(network.settings.load().health.interval_seconds);
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            info!(network = %network.name, "health checks stopped");
        });
    }

    /// Stops the health-check loop. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Runs one health-check round: polls every provider concurrently, then classifies them
    /// against the reference block.
    pub async fn run_health_check_round(&self) {
        let _round = self.round_lock.lock().await;
        let settings = self.settings.load_full();
        let providers = self.providers.snapshot();
        if providers.is_empty() {
            return;
        }

        let handles: Vec<_> = providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let transport = Arc::clone(&self.transport);
                let runtime = self.runtime;
                let method = settings.health_check_method.clone();
                let max_payload = settings.health.max_payload_size;
                tokio::spawn(async move {
                    provider
                        .fetch_latest_block_number(transport.as_ref(), runtime, &method, max_payload)
                        .await
                })
            })
            .collect();

        let polls: Vec<HeadPoll> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| HeadPoll {
                    status: None,
                    block: Err(UpstreamError::InvalidResponse(format!("health check task failed: {e}"))),
                    latency_ms: 0,
                })
            })
            .collect();

        let single = providers.len() == 1;
        let reference =
            if single { 0 } else { self.checked.percentile_block(REFERENCE_PERCENTILE) };

        for (provider, poll) in providers.iter().zip(polls) {
            self.classify(provider, poll, single, reference, &settings.health);
        }

        if settings.health.evaluate_checked_providers {
            self.evaluate_checked_providers();
        }

        let latest = self.latest_block_number();
        self.metrics.record_network_latest_block(&self.name, latest);
        debug!(network = %self.name, latest_block = latest, reference_block = reference, "health check round complete");
    }

    fn classify(
        &self,
        provider: &Provider,
        poll: HeadPoll,
        single: bool,
        reference: u64,
        health: &HealthCheckConfig,
    ) {
        let status = poll.status.unwrap_or(0);
        let block = match poll.block {
            Ok(block) => block,
            Err(error) if error.is_local_saturation() => {
                debug!(
                    network = %self.name,
                    provider = %provider.host(),
                    error = %error,
                    "health check skipped, local concurrency limit reached"
                );
                return;
            }
            Err(error) => {
                if error.is_rate_limited() {
                    provider.mark_ping_warning();
                } else {
                    provider.mark_ping_failure(health.threshold, &error);
                }
                debug!(
                    network = %self.name,
                    provider = %provider.host(),
                    error = %error,
                    latency_ms = poll.latency_ms,
                    "health check poll failed"
                );
                self.metrics.record_health_check(&self.name, provider.host(), status, provider.status(), 0);
                return;
            }
        };

        provider.set_latest_block_number(block);

        if reference != 0 {
            let ceiling = reference.saturating_add(health.block_number_delta);
            let floor = reference.saturating_sub(health.block_number_delta);
            if block > ceiling || block < floor {
                provider.mark_unhealthy();
                warn!(
                    network = %self.name,
                    provider = %provider.host(),
                    block_number = block,
                    reference_block = reference,
                    "provider head outside tolerated range"
                );
                self.metrics.record_health_check(&self.name, provider.host(), status, provider.status(), block);
                return;
            }
        }

        if single {
            provider.mark_healthy(health.threshold);
            self.observe_block(block);
        } else {
            if block.saturating_add(health.block_lag_limit) < reference {
                provider.mark_warning();
                debug!(
                    network = %self.name,
                    provider = %provider.host(),
                    block_number = block,
                    reference_block = reference,
                    "provider lagging reference block"
                );
            } else {
                provider.mark_ping_success(health.threshold);
            }
            self.observe_block(block.max(reference));
        }

        self.checked.record(provider.host(), block, Utc::now());
        self.metrics.record_health_check(&self.name, provider.host(), status, provider.status(), block);
    }

    /// Puts every provider whose newest recorded sample trails the network head by more than
    /// the lag limit into warning. Unhealthy providers keep their status.
    pub fn evaluate_checked_providers(&self) {
        let latest = self.latest_block_number();
        let lag_limit = self.settings.load().health.block_lag_limit;
        for provider in self.providers.snapshot().iter() {
            if provider.status() == HealthStatus::Unhealthy {
                continue;
            }
            let Some(sample) = self.checked.latest(provider.host()) else {
                continue;
            };
            if sample.block_number.saturating_add(lag_limit) < latest {
                provider.mark_warning();
                debug!(
                    network = %self.name,
                    provider = %provider.host(),
                    block_number = sample.block_number,
                    latest_block = latest,
                    "provider stale relative to network head"
                );
            }
        }
    }

    /// Reports one proxied request and updates the provider's passive reachability.
    ///
    /// `status` is `0` when the provider never answered.
    pub fn record_request(&self, method: &str, host: &str, provider: &Provider, status: u16) {
        provider.set_reachable(status != 0);
        self.metrics.record_request(&self.name, method, provider.host(), host, status, provider.status());
    }

    /// Applies a registry snapshot: adds new providers, updates changed ones, removes
    /// vanished ones, and swaps in the new settings.
    ///
    /// Providers whose URL is unchanged keep their health state. Waits for any in-flight
    /// round so a removed provider's history cannot be re-recorded.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::InvalidConfig`] and leaves the network untouched when the
    /// descriptor contains unusable definitions.
    pub async fn apply_descriptor(
        &self,
        descriptor: &super::NetworkDescriptor,
    ) -> Result<DescriptorChanges, UpstreamError> {
        let settings = resolve_settings(
            self.runtime,
            descriptor.health_check_method.as_deref(),
            &descriptor.health_check,
            &self.defaults,
        )?;
        build_providers(&descriptor.providers)?;

        let _round = self.round_lock.lock().await;
        let mut changes = DescriptorChanges::default();
        let mut wanted = HashSet::with_capacity(descriptor.providers.len());

        for config in &descriptor.providers {
            let host = config.resolve_host()?;
            wanted.insert(host.clone());
            match self.providers.get(&host) {
                Some(existing) if existing.config() == config => {}
                Some(existing) if existing.url() == config.url => {
                    self.providers.upsert(Arc::new(existing.rebuild(config.clone())?));
                    changes.updated += 1;
                }
                Some(_) => {
                    self.checked.remove(&host);
                    self.providers.upsert(Arc::new(Provider::new(config.clone())?));
                    changes.updated += 1;
                }
                None => {
                    self.providers.upsert(Arc::new(Provider::new(config.clone())?));
                    changes.added += 1;
                }
            }
        }

        for provider in self.providers.snapshot().iter() {
            if !wanted.contains(provider.host()) {
                self.providers.remove(provider.host());
                self.checked.remove(provider.host());
                changes.removed += 1;
            }
        }

        self.settings.store(Arc::new(settings));
        info!(
            network = %self.name,
            added = changes.added,
            updated = changes.updated,
            removed = changes.removed,
            "applied registry descriptor"
        );
        Ok(changes)
    }

    #[must_use]
    pub fn status(&self) -> NetworkStatus {
        let settings = self.settings.load();
        let providers: Vec<ProviderStatus> =
            self.providers.snapshot().iter().map(|p| p.snapshot()).collect();
        NetworkStatus {
            name: self.name.clone(),
            runtime: self.runtime,
            health_check_method: settings.health_check_method.clone(),
            interval_seconds: settings.health.interval_seconds,
            request_attempts: settings.health.request_attempts,
            latest_block: self.latest_block_number(),
            available_providers: providers.iter().filter(|p| p.available).count(),
            providers,
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("runtime", &self.runtime)
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

fn resolve_settings(
    runtime: ChainRuntime,
    method: Option<&str>,
    overrides: &HealthCheckOverrides,
    defaults: &HealthCheckConfig,
) -> Result<NetworkSettings, UpstreamError> {
    let health = overrides.apply(defaults);
    health.validate()?;
    let health_check_method = method
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| runtime.default_health_check_method())
        .to_string();
    Ok(NetworkSettings { health_check_method, health })
}

fn build_providers(configs: &[ProviderConfig]) -> Result<Vec<Provider>, UpstreamError> {
    let mut hosts = HashSet::with_capacity(configs.len());
    let mut providers = Vec::with_capacity(configs.len());
    for config in configs {
        let provider = Provider::new(config.clone())?;
        if !hosts.insert(provider.host().to_string()) {
            return Err(UpstreamError::InvalidConfig(format!(
                "duplicate provider host: {}",
                provider.host()
            )));
        }
        providers.push(provider);
    }
    Ok(providers)
}

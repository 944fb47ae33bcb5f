//! Builder for assembling the gateway runtime from [`AppConfig`].

use crate::{
    auth::{
        CounterStore, MemoryCounterStore, SessionAuthClient, UsageBackend, UsageBackendKind,
        UsageNotifier,
    },
    config::AppConfig,
    metrics::{MetricsCollector, MetricsSink, NoopMetrics},
    upstream::{HttpClient, HttpTransport, Network, NetworkRegistry},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::{lifecycle::GatewayRuntime, GatewayComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Building a network or the HTTP client failed
    #[error("Upstream initialization failed: {0}")]
    Upstream(#[from] crate::upstream::UpstreamError),

    /// A session client refused to start
    #[error("Session client {name} failed to start: {source}")]
    Session {
        name: String,
        #[source]
        source: crate::auth::SessionError,
    },

    /// Generic initialization error
    #[error("Runtime initialization failed: {0}")]
    Initialization(String),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_checks: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_health_checks: true }
    }
}

/// Builder for constructing a [`GatewayRuntime`].
///
/// The outbound transport and the shared counter store can be replaced, which is how tests
/// and embedders plug in fakes.
///
/// # Examples
///
/// ```no_run
/// # use meridian_core::{config::AppConfig, runtime::GatewayRuntimeBuilder};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = GatewayRuntimeBuilder::new().with_config(AppConfig::load()?).build()?;
/// runtime.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayRuntimeBuilder {
    config: Option<AppConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    counter_store: Option<Arc<dyn CounterStore>>,
    options: RuntimeOptions,
}

impl GatewayRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            counter_store: None,
            options: RuntimeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `transport` instead of a `reqwest` client built from `http_client` settings.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `store` for shared usage counters instead of an in-process store.
    #[must_use]
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Builds networks without starting their health-check loops on `start`.
    #[must_use]
    pub fn disable_health_checks(mut self) -> Self {
        self.options.enable_health_checks = false;
        self
    }

    /// Validates the configuration and assembles every component. Nothing runs until
    /// [`GatewayRuntime::start`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] for invalid configuration or unbuildable networks.
    pub fn build(self) -> Result<GatewayRuntime, RuntimeError> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(|e| RuntimeError::ConfigValidation(e.to_string()))?;

        let (metrics_collector, metrics_sink): (_, Arc<dyn MetricsSink>) =
            if config.metrics.enabled {
                let collector = Arc::new(MetricsCollector::new());
                (Some(Arc::clone(&collector)), collector)
            } else {
                (None, Arc::new(NoopMetrics))
            };

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpClient::with_config(config.http_client.clone())?),
        };

        let registry = Arc::new(NetworkRegistry::new());
        for network_config in &config.networks {
            let network = Network::new(
                network_config.clone(),
                config.health_check.clone(),
                Arc::clone(&transport),
                Arc::clone(&metrics_sink),
            )?;
            debug!(network = %network.name(), providers = network.providers().len(), "network built");
            registry.add_network(Arc::new(network))?;
        }

        let store = self.counter_store.unwrap_or_else(|| Arc::new(MemoryCounterStore::new()));
        let usage_notifier = Arc::new(UsageNotifier::new(store));

        let session_clients = config
            .sessions
            .iter()
            .map(|session| {
                let usage = match session.usage_backend {
                    UsageBackendKind::Local => UsageBackend::Local,
                    UsageBackendKind::Shared => UsageBackend::Shared {
                        notifier: Arc::clone(&usage_notifier),
                        batch_size: session.usage_batch_size,
                    },
                };
                SessionAuthClient::new(
                    session.clone(),
                    Arc::clone(&transport),
                    usage,
                    Arc::clone(&metrics_sink),
                )
            })
            .collect::<Vec<_>>();

        info!(
            networks = registry.len(),
            session_clients = session_clients.len(),
            metrics = config.metrics.enabled,
            "gateway runtime assembled"
        );

        let components = GatewayComponents::new(
            metrics_collector,
            metrics_sink,
            transport,
            registry,
            usage_notifier,
            session_clients,
        );
        Ok(GatewayRuntime::new(components, config, self.options.enable_health_checks))
    }
}

impl Default for GatewayRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

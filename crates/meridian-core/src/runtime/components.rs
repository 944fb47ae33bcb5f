//! Core component container for the gateway runtime.

use crate::{
    auth::{SessionAuthClient, UsageNotifier},
    metrics::{MetricsCollector, MetricsSink},
    upstream::{HttpTransport, NetworkRegistry, UpstreamSelector},
};
use std::sync::Arc;

/// Container for all initialized gateway components.
///
/// All components are wrapped in `Arc` (or are cheap handles) and safe to clone and share.
#[derive(Clone)]
pub struct GatewayComponents {
    metrics_collector: Option<Arc<MetricsCollector>>,
    metrics_sink: Arc<dyn MetricsSink>,
    transport: Arc<dyn HttpTransport>,
    registry: Arc<NetworkRegistry>,
    selector: Arc<UpstreamSelector>,
    usage_notifier: Arc<UsageNotifier>,
    session_clients: Vec<SessionAuthClient>,
}

impl GatewayComponents {
    /// Creates a new components container.
    ///
    /// Called by `GatewayRuntimeBuilder` during initialization.
    #[must_use]
    pub fn new(
        metrics_collector: Option<Arc<MetricsCollector>>,
        metrics_sink: Arc<dyn MetricsSink>,
        transport: Arc<dyn HttpTransport>,
        registry: Arc<NetworkRegistry>,
        usage_notifier: Arc<UsageNotifier>,
        session_clients: Vec<SessionAuthClient>,
    ) -> Self {
        let selector = Arc::new(UpstreamSelector::new(Arc::clone(&registry)));
        Self {
            metrics_collector,
            metrics_sink,
            transport,
            registry,
            selector,
            usage_notifier,
            session_clients,
        }
    }

    /// Prometheus collector, absent when metrics are disabled.
    #[must_use]
    pub fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics_collector.as_ref()
    }

    #[must_use]
    pub fn metrics_sink(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics_sink
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<UpstreamSelector> {
        &self.selector
    }

    #[must_use]
    pub fn usage_notifier(&self) -> &Arc<UsageNotifier> {
        &self.usage_notifier
    }

    #[must_use]
    pub fn session_clients(&self) -> &[SessionAuthClient] {
        &self.session_clients
    }

    /// Looks up a session client by configured name.
    #[must_use]
    pub fn session_client(&self, name: &str) -> Option<&SessionAuthClient> {
        self.session_clients.iter().find(|client| client.name() == name)
    }
}

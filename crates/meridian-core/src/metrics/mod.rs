//! # Metrics
//!
//! Components report through the [`MetricsSink`] trait and never touch a global recorder.
//! [`MetricsCollector`] owns a private Prometheus recorder: every emission runs inside
//! [`metrics::with_local_recorder`], so several collectors (one per test, one per embedded
//! gateway) coexist in the same process without clobbering each other.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `gateway_requests_total` | counter | service, method, provider, host, status, health |
//! | `gateway_health_checks_total` | counter | network, provider, status, health |
//! | `gateway_provider_health` | gauge | network, provider |
//! | `gateway_provider_block_number` | gauge | network, provider |
//! | `gateway_network_latest_block` | gauge | network |
//! | `gateway_session_acquisitions_total` | counter | client, outcome |

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::upstream::HealthStatus;

/// Destination for gateway metrics.
///
/// `status` is the HTTP status observed, `0` when no response was received.
pub trait MetricsSink: Send + Sync {
    /// Records one proxied request routed to `provider`.
    fn record_request(
        &self,
        service: &str,
        method: &str,
        provider: &str,
        host: &str,
        status: u16,
        health_status: HealthStatus,
    );

    /// Records the outcome of one provider poll in a health-check round.
    fn record_health_check(
        &self,
        network: &str,
        provider: &str,
        status: u16,
        health_status: HealthStatus,
        block_number: u64,
    );

    /// Records the network-wide reference head after a round.
    fn record_network_latest_block(&self, _network: &str, _block_number: u64) {}

    /// Records one session token acquisition attempt.
    fn record_session_acquisition(&self, _client: &str, _success: bool) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_request(&self, _: &str, _: &str, _: &str, _: &str, _: u16, _: HealthStatus) {}

    fn record_health_check(&self, _: &str, _: &str, _: u16, _: HealthStatus, _: u64) {}
}

/// Prometheus-backed [`MetricsSink`] with a collector-owned recorder.
pub struct MetricsCollector {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    /// Renders every recorded metric in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.recorder, f)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

impl MetricsSink for MetricsCollector {
    fn record_request(
        &self,
        service: &str,
        method: &str,
        provider: &str,
        host: &str,
        status: u16,
        health_status: HealthStatus,
    ) {
        self.scoped(|| {
            counter!(
                "gateway_requests_total",
                "service" => service.to_string(),
                "method" => method.to_string(),
                "provider" => provider.to_string(),
                "host" => host.to_string(),
                "status" => status.to_string(),
                "health" => health_status.as_str()
            )
            .increment(1);
        });
    }

    fn record_health_check(
        &self,
        network: &str,
        provider: &str,
        status: u16,
        health_status: HealthStatus,
        block_number: u64,
    ) {
        self.scoped(|| {
            counter!(
                "gateway_health_checks_total",
                "network" => network.to_string(),
                "provider" => provider.to_string(),
                "status" => status.to_string(),
                "health" => health_status.as_str()
            )
            .increment(1);
            gauge!(
                "gateway_provider_health",
                "network" => network.to_string(),
                "provider" => provider.to_string()
            )
            .set(health_status.as_gauge_value());
            if block_number > 0 {
                #[allow(clippy::cast_precision_loss)]
                gauge!(
                    "gateway_provider_block_number",
                    "network" => network.to_string(),
                    "provider" => provider.to_string()
                )
                .set(block_number as f64);
            }
        });
    }

    fn record_network_latest_block(&self, network: &str, block_number: u64) {
        self.scoped(|| {
            #[allow(clippy::cast_precision_loss)]
            gauge!("gateway_network_latest_block", "network" => network.to_string())
                .set(block_number as f64);
        });
    }

    fn record_session_acquisition(&self, client: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.scoped(|| {
            counter!(
                "gateway_session_acquisitions_total",
                "client" => client.to_string(),
                "outcome" => outcome
            )
            .increment(1);
        });
    }
}

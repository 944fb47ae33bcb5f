//! Runtime lifecycle: starting background work and graceful shutdown.

use crate::{
    auth::{SessionAuthClient, UsageNotifier},
    config::AppConfig,
    upstream::NetworkRegistry,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    builder::{GatewayRuntimeBuilder, RuntimeError},
    GatewayComponents,
};

/// Owns the gateway components and their background tasks.
///
/// Background work consists of one health-check loop per network, one renewal task per
/// session slot, and the shared-usage exhaustion listener. All of it stops on
/// [`shutdown`](Self::shutdown).
pub struct GatewayRuntime {
    components: GatewayComponents,
    config: AppConfig,
    enable_health_checks: bool,
    started: AtomicBool,
    shutdown_initiated: AtomicBool,
    shutdown: CancellationToken,
}

impl GatewayRuntime {
    #[must_use]
    pub fn builder() -> GatewayRuntimeBuilder {
        GatewayRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: GatewayComponents,
        config: AppConfig,
        enable_health_checks: bool,
    ) -> Self {
        Self {
            components,
            config,
            enable_health_checks,
            started: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn components(&self) -> &GatewayComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NetworkRegistry> {
        self.components.registry()
    }

    #[must_use]
    pub fn session_clients(&self) -> &[SessionAuthClient] {
        self.components.session_clients()
    }

    #[must_use]
    pub fn usage_notifier(&self) -> &Arc<UsageNotifier> {
        self.components.usage_notifier()
    }

    /// Token cancelled when [`shutdown`](Self::shutdown) begins.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the exhaustion listener, every session client, and the health-check loops.
    ///
    /// Session clients start before health checks so credentials exist by the time traffic
    /// is routed. Calling `start` twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Session`] when a session client rejects its configuration.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Runtime already started, ignoring duplicate call");
            return Ok(());
        }

        self.components.usage_notifier().start();

        for client in self.components.session_clients() {
            client.start().await.map_err(|source| RuntimeError::Session {
                name: client.name().to_string(),
                source,
            })?;
            debug!(client = %client.name(), "session client started");
        }

        if self.enable_health_checks {
            self.components.registry().start_all();
            debug!(networks = self.components.registry().len(), "health checks started");
        }

        info!("Gateway runtime started");
        Ok(())
    }

    /// Stops all background work. Idempotent.
    pub fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating gateway runtime shutdown");
        self.shutdown.cancel();
        for client in self.components.session_clients() {
            client.stop();
        }
        self.components.registry().stop_all();
        self.components.usage_notifier().stop();
        info!("Gateway runtime shutdown complete");
    }

    /// Waits until [`shutdown`](Self::shutdown) is called from elsewhere.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.cancelled().await;
    }
}

impl Drop for GatewayRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

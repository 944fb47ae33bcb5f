use anyhow::Result;
use axum::serve;
use meridian_core::{config::AppConfig, runtime::GatewayRuntime};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod router;

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins when set; `debug` and `trace` are widened to the workspace crates only.
fn init_logging(config: &AppConfig) {
    let default_filter = format!("warn,meridian_core={0},server={0}", config.logging.level);
    let filter = match std::env::var("RUST_LOG").as_deref() {
        Ok("debug") => EnvFilter::new("warn,meridian_core=debug,server=debug"),
        Ok("trace") => EnvFilter::new("warn,meridian_core=trace,server=trace"),
        Ok(_) => EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(&default_filter)),
        Err(_) => EnvFilter::new(&default_filter),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration load failed: {e}"))?;

    init_logging(&config);
    info!("Starting Meridian gateway");
    debug!(
        networks_count = config.networks.len(),
        session_clients_count = config.sessions.len(),
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    let addr = config.socket_addr()?;
    let runtime = Arc::new(GatewayRuntime::builder().with_config(config).build()?);
    runtime.start().await?;

    let app = router::create_router(Arc::clone(&runtime));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Admin server listening");

    let shutdown_runtime = Arc::clone(&runtime);
    if let Err(e) = serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_runtime.shutdown();
        })
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

//! Integration tests for the gateway runtime lifecycle.
//!
//! These tests verify the behavioral contracts of the assembled runtime:
//! - Networks and session clients come up on `start` and go down on `shutdown`
//! - Shutdown is idempotent and visible through the shutdown token
//! - Descriptor updates reach the running health-check loops
//! - Injected transport and counter store are used by every component
//!
//! Tests use realistic timing with `tokio::time::timeout` to prevent hanging on failures.

use crate::mock_infrastructure::{AuthMockBuilder, CountingTransport, RpcMockBuilder, TEST_PRIVATE_KEY};
use meridian_core::{
    auth::{
        token::usage_key, ClientState, CounterStore, MemoryCounterStore, SessionClientConfig,
        UsageBackendKind,
    },
    config::AppConfig,
    runtime::{GatewayRuntime, GatewayRuntimeBuilder, RuntimeError},
    upstream::{ChainRuntime, HealthCheckConfig, NetworkConfig, NetworkDescriptor, ProviderConfig},
};
use std::{collections::BTreeMap, sync::Arc};
use tokio::time::{timeout, Duration};

fn config(provider_urls: &[String]) -> AppConfig {
    let mut network = NetworkConfig::new("ethereum", ChainRuntime::Ethereum);
    for url in provider_urls {
        network = network.with_provider(ProviderConfig::new(url.clone()));
    }
    AppConfig {
        health_check: HealthCheckConfig { interval_seconds: 1, ..HealthCheckConfig::default() },
        networks: vec![network],
        ..AppConfig::default()
    }
}

fn session(auth: &AuthMockBuilder, backend: UsageBackendKind) -> SessionClientConfig {
    SessionClientConfig {
        usage_backend: backend,
        usage_batch_size: 2,
        ..SessionClientConfig::new("primary", auth.auth_url(), TEST_PRIVATE_KEY)
    }
}

async fn wait_for(condition: impl Fn() -> bool) -> bool {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_start_brings_networks_and_sessions_up() {
    let mut provider = RpcMockBuilder::new().await;
    provider.mock_block_number(1234).await;
    let mut auth = AuthMockBuilder::new().await;
    auth.mock_token(&[("Authorization", "Bearer runtime")], None, None).await;

    let mut config = config(&[provider.url()]);
    config.sessions.push(session(&auth, UsageBackendKind::Local));
    let runtime = GatewayRuntimeBuilder::new().with_config(config).build().unwrap();

    runtime.start().await.unwrap();

    let client = &runtime.session_clients()[0];
    assert_eq!(client.state(), ClientState::Running);
    assert!(client.error().is_none());

    let network = runtime.registry().get_network("ethereum").unwrap();
    assert!(network.is_running());
    assert!(wait_for(|| network.latest_block_number() == 1234).await);

    let collector = runtime.components().metrics_collector().unwrap();
    assert!(wait_for(|| collector.render().contains("gateway_health_checks_total")).await);

    runtime.shutdown();
    assert!(!network.is_running());
    assert_eq!(client.state(), ClientState::Stopped);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_observable() {
    let runtime = GatewayRuntimeBuilder::new().with_config(config(&[])).build().unwrap();
    runtime.start().await.unwrap();
    runtime.start().await.unwrap();

    let token = runtime.shutdown_token();
    assert!(!token.is_cancelled());

    runtime.shutdown();
    runtime.shutdown();
    assert!(token.is_cancelled());
    assert!(timeout(Duration::from_millis(100), runtime.wait_for_shutdown()).await.is_ok());
}

#[tokio::test]
async fn test_wait_for_shutdown_wakes_other_tasks() {
    let runtime = Arc::new(GatewayRuntime::builder().with_config(config(&[])).build().unwrap());
    runtime.start().await.unwrap();

    let waiter = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.wait_for_shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    runtime.shutdown();
    assert!(timeout(Duration::from_secs(1), waiter).await.is_ok());
}

#[tokio::test]
async fn test_disabled_health_checks_leave_networks_idle() {
    let mut provider = RpcMockBuilder::new().await;
    provider.mock_block_number(10).await;
    let runtime = GatewayRuntimeBuilder::new()
        .with_config(config(&[provider.url()]))
        .disable_health_checks()
        .build()
        .unwrap();

    runtime.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let network = runtime.registry().get_network("ethereum").unwrap();
    assert!(!network.is_running());
    assert!(!provider.was_called().await);
    runtime.shutdown();
}

#[tokio::test]
async fn test_invalid_session_key_fails_start() {
    let auth = AuthMockBuilder::new().await;
    let mut config = config(&[]);
    config.sessions.push(SessionClientConfig {
        private_key: "not-a-key".to_string(),
        ..session(&auth, UsageBackendKind::Local)
    });
    let runtime = GatewayRuntimeBuilder::new().with_config(config).build().unwrap();

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, RuntimeError::Session { ref name, .. } if name == "primary"));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_build() {
    let mut config = config(&["https://a.example.com".to_string()]);
    config.networks.push(config.networks[0].clone());

    let result = GatewayRuntimeBuilder::new().with_config(config).build();
    assert!(matches!(result, Err(RuntimeError::ConfigValidation(_))));
}

#[tokio::test]
async fn test_descriptor_update_reaches_running_network() {
    let mut first = RpcMockBuilder::new().await;
    first.mock_block_number(500).await;
    let runtime = GatewayRuntimeBuilder::new()
        .with_config(config(&[first.url()]))
        .build()
        .unwrap();
    runtime.start().await.unwrap();

    let network = runtime.registry().get_network("ethereum").unwrap();
    assert!(wait_for(|| network.provider(&first.host()).is_some_and(|p| p.available())).await);

    let mut second = RpcMockBuilder::new().await;
    second.mock_block_number(501).await;
    let descriptor = NetworkDescriptor {
        providers: vec![ProviderConfig::new(first.url()), ProviderConfig::new(second.url())],
        ..NetworkDescriptor::default()
    };
    let changes = runtime.registry().apply_descriptor("ethereum", &descriptor).await.unwrap();
    assert_eq!((changes.added, changes.updated, changes.removed), (1, 0, 0));

    assert!(wait_for(|| network.latest_block_number() >= 501).await);
    assert!(second.was_called().await);
    runtime.shutdown();
}

#[tokio::test]
async fn test_injected_transport_and_store_are_used() {
    let mut auth = AuthMockBuilder::new().await;
    auth.mock_token(&[("Authorization", "Bearer metered")], None, Some(10)).await;
    let transport = CountingTransport::http();
    let store = Arc::new(MemoryCounterStore::new());

    let mut config = config(&[]);
    config.sessions.push(session(&auth, UsageBackendKind::Shared));
    let runtime = GatewayRuntimeBuilder::new()
        .with_config(config)
        .with_transport(transport.clone())
        .with_counter_store(Arc::clone(&store) as Arc<dyn CounterStore>)
        .build()
        .unwrap();
    runtime.start().await.unwrap();
    assert_eq!(transport.calls(), 1);

    let client = runtime.components().session_client("primary").unwrap();
    client.sign_headers(&mut http::HeaderMap::new()).await.unwrap();

    let headers: BTreeMap<String, String> =
        [("Authorization".to_string(), "Bearer metered".to_string())].into_iter().collect();
    assert_eq!(store.get(&usage_key(&headers)), Some(8));
    runtime.shutdown();
}

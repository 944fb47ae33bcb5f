//! Integration tests for health-check rounds against mocked providers.
//!
//! Every provider is a separate mockito server, so the round polls real HTTP endpoints
//! through the production `reqwest` transport. Rounds are driven by hand with
//! `run_health_check_round` except where the background loop itself is under test.

use crate::mock_infrastructure::{
    ethereum_network, health_config, network, RecordingMetrics, RpcMockBuilder,
};
use bytes::Bytes;
use http::HeaderMap;
use meridian_core::upstream::{
    ChainRuntime, HealthCheckConfig, HealthStatus, HttpClient, HttpTransport, UpstreamError,
};
use std::time::Duration;

async fn providers(blocks: &[u64]) -> Vec<RpcMockBuilder> {
    let mut mocks = Vec::with_capacity(blocks.len());
    for block in blocks {
        let mut mock = RpcMockBuilder::new().await;
        mock.mock_block_number(*block).await;
        mocks.push(mock);
    }
    mocks
}

fn urls(mocks: &[RpcMockBuilder]) -> Vec<String> {
    mocks.iter().map(RpcMockBuilder::url).collect()
}

#[tokio::test]
async fn test_single_provider_hex_head_is_healthy_after_one_round() {
    let mocks = providers(&[600]).await;
    let metrics = RecordingMetrics::new();
    let network = ethereum_network(&urls(&mocks), health_config(1, 10), metrics.clone());

    network.run_health_check_round().await;

    let provider = network.provider(&mocks[0].host()).unwrap();
    assert_eq!(provider.status(), HealthStatus::Healthy);
    assert!(provider.available());
    assert_eq!(provider.latest_block_number(), Some(600));
    assert_eq!(network.latest_block_number(), 600);
    assert!(mocks[0].was_called().await);

    let checks = metrics.checks_for(&mocks[0].host());
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status, 200);
    assert_eq!(checks[0].health, HealthStatus::Healthy);
    assert_eq!(checks[0].block_number, 600);
    assert_eq!(metrics.latest_blocks.lock().last(), Some(&("ethereum".to_string(), 600)));
}

#[tokio::test]
async fn test_integer_result_is_accepted() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number_int(7_310_269).await;
    let network =
        ethereum_network(&[mock.url()], health_config(1, 10), RecordingMetrics::new());

    network.run_health_check_round().await;

    assert_eq!(network.latest_block_number(), 7_310_269);
    assert!(network.provider(&mock.host()).unwrap().available());
}

#[tokio::test]
async fn test_solana_network_polls_get_slot() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_slot(250_000_000).await;
    let network = network(
        ChainRuntime::Solana,
        &[mock.url()],
        health_config(1, 10),
        RecordingMetrics::new(),
    );

    network.run_health_check_round().await;

    assert!(mock.was_called().await);
    assert_eq!(network.latest_block_number(), 250_000_000);
}

#[tokio::test]
async fn test_multi_provider_needs_hysteresis_before_healthy() {
    let mocks = providers(&[1000, 1000, 1000]).await;
    let network = ethereum_network(&urls(&mocks), health_config(1, 10), RecordingMetrics::new());

    network.run_health_check_round().await;
    for mock in &mocks {
        let provider = network.provider(&mock.host()).unwrap();
        assert_eq!(provider.successes(), 1);
        assert!(!provider.available(), "one success must not cross threshold 1");
    }
    assert_eq!(network.latest_block_number(), 1000);

    network.run_health_check_round().await;
    for mock in &mocks {
        assert!(network.provider(&mock.host()).unwrap().available());
    }
    assert_eq!(network.status().available_providers, 3);
}

#[tokio::test]
async fn test_lagging_provider_is_put_into_warning_and_recovers() {
    let mut mocks = providers(&[1000, 1000, 985]).await;
    let network = ethereum_network(&urls(&mocks), health_config(1, 10), RecordingMetrics::new());
    let laggard = mocks[2].host();

    network.run_health_check_round().await;
    assert_eq!(network.provider(&laggard).unwrap().status(), HealthStatus::Warning);

    network.run_health_check_round().await;
    assert!(network.provider(&mocks[0].host()).unwrap().available());
    assert!(network.provider(&mocks[1].host()).unwrap().available());
    let provider = network.provider(&laggard).unwrap();
    assert_eq!(provider.status(), HealthStatus::Warning);
    assert!(!provider.available());

    mocks[2].mock_block_number(1000).await;
    network.run_health_check_round().await;
    assert_eq!(network.provider(&laggard).unwrap().status(), HealthStatus::Healthy);
    assert!(network.provider(&laggard).unwrap().available());
}

#[tokio::test]
async fn test_lag_within_limit_stays_healthy() {
    let mocks = providers(&[1000, 1000, 990]).await;
    let network = ethereum_network(&urls(&mocks), health_config(1, 10), RecordingMetrics::new());

    network.run_health_check_round().await;
    network.run_health_check_round().await;

    assert!(network.provider(&mocks[2].host()).unwrap().available());
}

#[tokio::test]
async fn test_implausible_head_marks_unhealthy_without_moving_reference() {
    let mut mocks = providers(&[1000, 1000, 1000]).await;
    let health = HealthCheckConfig { block_number_delta: 1000, ..health_config(1, 10) };
    let network = ethereum_network(&urls(&mocks), health, RecordingMetrics::new());
    let outlier = mocks[2].host();

    network.run_health_check_round().await;
    network.run_health_check_round().await;
    assert!(network.provider(&outlier).unwrap().available());

    mocks[2].mock_block_number(50_000).await;
    network.run_health_check_round().await;

    let provider = network.provider(&outlier).unwrap();
    assert_eq!(provider.status(), HealthStatus::Unhealthy);
    assert_eq!(provider.latest_block_number(), Some(50_000));
    assert_eq!(network.latest_block_number(), 1000);
    assert_eq!(network.checked_providers().latest(&outlier).unwrap().block_number, 1000);
}

#[tokio::test]
async fn test_rate_limited_poll_is_soft_warning() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(600).await;
    let metrics = RecordingMetrics::new();
    let network = ethereum_network(&[mock.url()], health_config(1, 10), metrics.clone());

    network.run_health_check_round().await;
    assert!(network.provider(&mock.host()).unwrap().available());

    mock.mock_status(429).await;
    network.run_health_check_round().await;
    let provider = network.provider(&mock.host()).unwrap();
    assert_eq!(provider.status(), HealthStatus::Warning);
    assert_eq!(provider.failures(), 0);
    assert!(provider.is_reachable());
    assert_eq!(metrics.checks_for(&mock.host()).last().unwrap().status, 429);

    mock.mock_block_number(601).await;
    network.run_health_check_round().await;
    assert_eq!(network.provider(&mock.host()).unwrap().status(), HealthStatus::Healthy);
}

#[tokio::test]
async fn test_server_errors_cross_failure_threshold() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_block_number(600).await;
    let metrics = RecordingMetrics::new();
    let network = ethereum_network(&[mock.url()], health_config(1, 10), metrics.clone());
    network.run_health_check_round().await;

    mock.mock_status(500).await;
    network.run_health_check_round().await;
    let provider = network.provider(&mock.host()).unwrap();
    assert_eq!(provider.failures(), 1);
    assert!(provider.available(), "one failure must not cross threshold 1");

    network.run_health_check_round().await;
    let provider = network.provider(&mock.host()).unwrap();
    assert_eq!(provider.status(), HealthStatus::Unhealthy);
    assert!(!provider.available());
    assert!(provider.is_reachable(), "an HTTP answer proves reachability");

    let last = metrics.checks_for(&mock.host()).last().cloned().unwrap();
    assert_eq!(last.status, 500);
    assert_eq!(last.health, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_rpc_error_counts_as_failure() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error(-32000, "header not found").await;
    let network = ethereum_network(&[mock.url()], health_config(0, 10), RecordingMetrics::new());

    network.run_health_check_round().await;

    let provider = network.provider(&mock.host()).unwrap();
    assert_eq!(provider.status(), HealthStatus::Unhealthy);
    assert_eq!(provider.latest_block_number(), None);
    assert_eq!(network.latest_block_number(), 0);
}

#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_raw_body(64).await;
    let health = HealthCheckConfig { max_payload_size: 8, ..health_config(0, 10) };
    let metrics = RecordingMetrics::new();
    let network = ethereum_network(&[mock.url()], health, metrics.clone());

    network.run_health_check_round().await;

    let provider = network.provider(&mock.host()).unwrap();
    assert_eq!(provider.status(), HealthStatus::Unhealthy);
    assert!(provider.is_reachable(), "an oversized answer is still an answer");
    let checks = metrics.checks_for(&mock.host());
    assert_eq!(checks[0].status, 0);
    assert_eq!(checks[0].block_number, 0);
}

#[tokio::test]
async fn test_body_cap_applies_to_declared_and_streamed_lengths() {
    let client = HttpClient::new().unwrap();
    let headers = HeaderMap::new();

    let mut declared = RpcMockBuilder::new().await;
    declared.mock_raw_body(64).await;
    let err = client
        .post_limited(&declared.url(), &headers, Bytes::from_static(b"{}"), 8)
        .await
        .unwrap_err();
    assert_eq!(err, UpstreamError::PayloadTooLarge(64, 8));

    let mut streamed = RpcMockBuilder::new().await;
    streamed.mock_chunked_body(4096).await;
    let err = client
        .post_limited(&streamed.url(), &headers, Bytes::from_static(b"{}"), 100)
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::PayloadTooLarge(read, 100) if read > 100));

    let within = client
        .post_limited(&streamed.url(), &headers, Bytes::from_static(b"{}"), 4096)
        .await
        .unwrap();
    assert_eq!(within.body.len(), 4096);
}

#[tokio::test]
async fn test_refused_connection_marks_unreachable() {
    let network = ethereum_network(
        &["http://127.0.0.1:1".to_string()],
        health_config(0, 10),
        RecordingMetrics::new(),
    );

    network.run_health_check_round().await;

    let provider = network.provider("127.0.0.1:1").unwrap();
    assert!(!provider.is_reachable());
    assert_eq!(provider.status(), HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_background_loop_runs_until_stopped() {
    let mocks = providers(&[42]).await;
    let health = HealthCheckConfig { interval_seconds: 1, ..health_config(1, 10) };
    let network = ethereum_network(&urls(&mocks), health, RecordingMetrics::new());

    network.start();
    assert!(network.is_running());

    let host = mocks[0].host();
    let became_available = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if network.provider(&host).is_some_and(|p| p.available()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(became_available.is_ok());
    assert_eq!(network.latest_block_number(), 42);

    network.stop();
    assert!(!network.is_running());
}

//! Mock infrastructure for gateway integration tests.
//!
//! ## Components
//!
//! - `RpcMockBuilder`: one mockito-backed provider answering chain-head polls
//! - `AuthMockBuilder`: mockito-backed SIWE auth endpoint
//! - Test helpers: recording metrics sink, counting transport, network fixtures
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{ethereum_network, health_config, RecordingMetrics, RpcMockBuilder};
//!
//! let mut provider = RpcMockBuilder::new().await;
//! provider.mock_block_number(600).await;
//!
//! let network = ethereum_network(&[provider.url()], health_config(1, 10), RecordingMetrics::new());
//! network.run_health_check_round().await;
//! ```

pub mod rpc_mock;
pub mod test_helpers;

pub use auth_mock::AuthMockBuilder;
pub use rpc_mock::RpcMockBuilder;
pub use test_helpers::*;

//! Upstream RPC provider management.
//!
//! This module handles everything between a logical network and the upstream providers
//! serving it:
//! - Provider health state machine with hysteresis ([`Provider`])
//! - Periodic chain-head polling and classification against a reference block ([`Network`])
//! - Registry snapshots adding, updating and removing providers ([`NetworkRegistry`])
//! - Priority-tiered, session-sticky selection for the hosting proxy ([`UpstreamSelector`])
//!
//! # Health-check round
//!
//! ```text
//! interval tick
//!   │
//!   ├─ fan out: one chain-head poll per provider, join all
//!   │
//!   ├─ per provider:
//!   │    transport error? ── 429 → warning, else failure hysteresis
//!   │    outside reference ± delta? ── unhealthy
//!   │    single provider? ── healthy
//!   │    lagging reference? ── warning, else success hysteresis
//!   │    record sample
//!   │
//!   └─ stale newest sample vs network head → warning
//! ```

pub mod affinity;
pub mod chain;
pub mod errors;
pub mod history;
pub mod http_client;
pub mod network;
pub mod provider;
pub mod provider_set;
pub mod registry;
pub mod selector;

pub use affinity::{affinity_index, SESSION_HEADER};
pub use chain::ChainRuntime;
pub use errors::UpstreamError;
pub use history::{BlockHistory, BlockSample, CheckedProviders};
pub use http_client::{HttpClient, HttpClientConfig, HttpResponse, HttpTransport};
pub use network::{
    DescriptorChanges, HealthCheckConfig, HealthCheckOverrides, Network, NetworkConfig,
    NetworkSettings, NetworkStatus,
};
pub use provider::{HeadPoll, HealthStatus, Provider, ProviderConfig, ProviderStatus};
pub use provider_set::ProviderSet;
pub use registry::{NetworkDescriptor, NetworkRegistry};
pub use selector::{tiered_upstreams, ProviderPool, UpstreamSelector};

//! # Meridian Core
//!
//! Core library for the Meridian multi-provider JSON-RPC gateway.
//!
//! This crate provides:
//!
//! - **[`upstream`]**: Networks of upstream providers, the periodic health-check round with
//!   hysteresis and block-lag detection, a hot-swappable network registry, and
//!   session-affine upstream selection.
//!
//! - **[`auth`]**: Sign-In-With-Ethereum session clients that keep a pool of credentials
//!   renewed in the background, with local or shared usage metering.
//!
//! - **[`metrics`]**: Prometheus metrics behind the [`metrics::MetricsSink`] trait.
//!
//! - **[`config`]**: Layered TOML and environment configuration.
//!
//! - **[`runtime`]**: Assembly of all components from configuration plus lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GatewayRuntime                        │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────┐  │
//! │  │ NetworkRegistry  │  │ SessionAuthClient│  │  Metrics   │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  └─────┬──────┘  │
//! │           │                     │                  │         │
//! │  ┌────────▼─────────┐  ┌────────▼─────────┐  ┌─────▼──────┐  │
//! │  │ Network          │  │ AuthToken slots  │  │ Prometheus │  │
//! │  │  health loop     │  │ UsageTracker     │  │  recorder  │  │
//! │  │  ProviderSet     │  │ UsageNotifier    │  └────────────┘  │
//! │  └────────┬─────────┘  └──────────────────┘                  │
//! │           │                                                  │
//! │  ┌────────▼─────────┐                                        │
//! │  │ UpstreamSelector │                                        │
//! │  └──────────────────┘                                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────────┐
//! │ selector.annotate│ ─── unknown network ──► Error
//! └────────┬─────────┘
//!          │ healthy, lowest-priority tier attached
//!          ▼
//! ┌──────────────────┐
//! │ selector.select  │ ─── none reachable ──► NoAvailableUpstream
//! └────────┬─────────┘
//!          │ X-Session-Id affinity, path + headers rewritten
//!          ▼
//! ┌──────────────────┐
//! │ session.sign     │ ─── no usable credential ──► Error
//! └────────┬─────────┘
//!          │
//!          ▼
//!   Upstream HTTP request
//!          │
//!          ▼
//!   network.record_request (reachability + metrics)
//! ```

pub mod auth;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod types;
pub mod upstream;

//! Gateway runtime initialization and lifecycle management.
//!
//! The runtime turns an [`AppConfig`](crate::config::AppConfig) into live components: one
//! [`Network`](crate::upstream::Network) per configured chain inside a shared registry, an
//! [`UpstreamSelector`](crate::upstream::UpstreamSelector) over that registry, and one
//! [`SessionAuthClient`](crate::auth::SessionAuthClient) per configured auth service.
//!
//! # Example
//!
//! ```no_run
//! use meridian_core::{config::AppConfig, runtime::GatewayRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = GatewayRuntime::builder().with_config(AppConfig::load()?).build()?;
//!     runtime.start().await?;
//!
//!     let selector = runtime.components().selector();
//!     // ... route requests with the selector ...
//!
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{GatewayRuntimeBuilder, RuntimeError};
pub use components::GatewayComponents;
pub use lifecycle::GatewayRuntime;

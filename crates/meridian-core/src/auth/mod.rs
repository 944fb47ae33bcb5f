//! Session authentication for upstream auth services that issue credentials in exchange for a
//! Sign-In-With-Ethereum signature.
//!
//! # Architecture
//!
//! - **[`siwe`]**: EIP-4361 message rendering and EIP-191 signing ([`SessionSigner`])
//! - **[`token`]**: [`AuthToken`], the credential returned by the auth endpoint
//! - **[`usage`]**: per-credential use budgets ([`UsageTracker`]), local or shared
//! - **[`shared_usage`]**: batch-refilled trackers over a shared [`CounterStore`]
//! - **[`client`]**: [`SessionAuthClient`], a fixed-size pool of credentials renewed in the
//!   background
//!
//! # Credential Flow
//!
//! ```text
//!   start()                          background task per slot
//!   =======                          ========================
//!
//!   sign SIWE message ──POST──> auth endpoint
//!        │                            │
//!        │            {headers, exp, uses} or {error}
//!        │                            │
//!        └── slot[i] = AuthToken <────┘
//!                  │
//!                  ├── sleep until exp - renew_before ──> acquire again
//!                  └── on failure: retry after acquire/renew interval
//!
//!   sign(request)
//!   =============
//!
//!   slot = fnv1a(X-Session-Id) % slots ──> consume() ──ok──> copy headers
//!                                             │
//!                                          expired / exhausted
//!                                             └──> next slot (bounded attempts)
//! ```
//!
//! Slots are swapped atomically, so a request holding an old credential finishes with it while
//! new requests see the renewed one.

pub mod client;
pub mod errors;
pub mod shared_usage;
pub mod siwe;
pub mod token;
pub mod usage;

pub use client::{ClientState, SessionAuthClient, SessionClientConfig};
pub use errors::SessionError;
pub use shared_usage::{CounterStore, DistributedUsageTracker, MemoryCounterStore, UsageNotifier};
pub use siwe::{SessionSigner, SiweMessage};
pub use token::{AuthToken, SessionRequest, TokenResponse};
pub use usage::{LocalUsageTracker, UsageBackend, UsageBackendKind, UsageTracker};

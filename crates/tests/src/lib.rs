//! Integration tests for the Meridian gateway core
//!
//! This crate contains various test modules:
//!
//! - `health_check_tests`: Health-check rounds, classification and hysteresis against mocked providers
//! - `selector_tests`: Priority tiers, session affinity and request rewriting
//! - `session_client_tests`: SIWE session acquisition, renewal and signing
//! - `shared_usage_tests`: Usage budgets shared between instances through one counter store
//! - `runtime_tests`: Runtime assembly, start-up and graceful shutdown
//! - `mock_infrastructure`: Reusable mocks for RPC providers and the auth endpoint
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! Every provider and auth endpoint is a local mockito server, so no external services are
//! needed.

#[cfg(test)]
mod health_check_tests;

#[cfg(test)]
mod runtime_tests;



#[cfg(test)]
mod shared_usage_tests;

pub mod mock_infrastructure;

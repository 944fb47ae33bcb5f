//! Chain-head RPC mocks.
//!
//! Wraps mockito to answer the health-check poll of one provider. Each `mock_*` call replaces
//! the previous answer, so a test can walk a provider through a sequence of states.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// One mocked provider endpoint.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    /// Creates a builder with a fresh mockito server and no mocks.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    /// Base URL of the mock server.
    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// `host:port` of the mock server, as used for provider identity.
    #[must_use]
    pub fn host(&self) -> String {
        self.server.host_with_port()
    }

    async fn replace(&mut self, mock: Mock) {
        for old in self.mocks.drain(..) {
            old.remove_async().await;
        }
        self.mocks.push(mock);
    }

    async fn mock_result(&mut self, method: &str, result: Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .expect_at_least(1)
            .create_async()
            .await;
        self.replace(mock).await;
        self
    }

    /// Answers `eth_blockNumber` with a hex quantity.
    pub async fn mock_block_number(&mut self, block_number: u64) -> &mut Self {
        self.mock_result("eth_blockNumber", json!(format!("0x{block_number:x}"))).await
    }

    /// Answers `eth_blockNumber` with a plain JSON integer.
    pub async fn mock_block_number_int(&mut self, block_number: u64) -> &mut Self {
        self.mock_result("eth_blockNumber", json!(block_number)).await
    }

    /// Answers `getSlot` with a plain JSON integer.
    pub async fn mock_slot(&mut self, slot: u64) -> &mut Self {
        self.mock_result("getSlot", json!(slot)).await
    }

    /// Answers any request with a JSON-RPC error object.
    pub async fn mock_rpc_error(&mut self, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": code, "message": message }
                })
                .to_string(),
            )
            .expect_at_least(1)
            .create_async()
            .await;
        self.replace(mock).await;
        self
    }

    /// Answers any request with a bare HTTP status.
    pub async fn mock_status(&mut self, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_body("upstream unavailable")
            .expect_at_least(1)
            .create_async()
            .await;
        self.replace(mock).await;
        self
    }

    /// Answers with a body of `len` bytes that is not JSON.
    pub async fn mock_raw_body(&mut self, len: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_body("x".repeat(len))
            .expect_at_least(1)
            .create_async()
            .await;
        self.replace(mock).await;
        self
    }

    /// Streams `len` filler bytes without a `Content-Length` header.
    pub async fn mock_chunked_body(&mut self, len: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(200)
            .with_chunked_body(move |writer| {
                for _ in 0..len / 16 {
                    writer.write_all(&[b'x'; 16])?;
                }
                writer.write_all(&vec![b'x'; len % 16])
            })
            .expect_at_least(1)
            .create_async()
            .await;
        self.replace(mock).await;
        self
    }

    /// Whether every current mock was hit at least once.
    pub async fn was_called(&self) -> bool {
        let mut called = true;
        for mock in &self.mocks {
            called &= mock.matched_async().await;
        }
        called
    }
}

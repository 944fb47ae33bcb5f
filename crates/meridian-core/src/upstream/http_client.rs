use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::upstream::UpstreamError;

/// Maximum number of response body bytes kept in an [`UpstreamError::HttpError`].
const ERROR_BODY_LIMIT: usize = 256;

/// Raw HTTP response: status code plus body, regardless of whether the status is an error.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    /// Converts statuses above 399 into [`UpstreamError::HttpError`], returning the body
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::HttpError`] carrying the status and a truncated body.
    pub fn error_for_status(self) -> Result<Bytes, UpstreamError> {
        if self.status > 399 {
            let text = String::from_utf8_lossy(&self.body);
            let sanitized = if text.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                format!("{}... (truncated)", &text[..cut])
            } else {
                text.into_owned()
            };
            return Err(UpstreamError::HttpError(self.status, sanitized));
        }
        Ok(self.body)
    }
}

/// Outbound POST transport used by the health-check poller and the session client.
///
/// Implementations must bound every call with connect and request timeouts so that no
/// health round or token acquisition can hang.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `body` to `url` with the given extra headers.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport-level failures; HTTP error statuses are reported
    /// through [`HttpResponse::status`].
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, UpstreamError>;

    /// Like [`post`](Self::post), but gives up once the response body exceeds `max_body`
    /// bytes.
    ///
    /// The default implementation checks the size after the fact; transports that can
    /// stream should stop reading at the limit.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::PayloadTooLarge`] for oversized bodies, otherwise as `post`.
    async fn post_limited(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        max_body: usize,
    ) -> Result<HttpResponse, UpstreamError> {
        let response = self.post(url, headers, body).await?;
        if response.body.len() > max_body {
            return Err(UpstreamError::PayloadTooLarge(response.body.len(), max_body));
        }
        Ok(response)
    }
}

/// Configuration for HTTP client concurrency and timeout behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
    /// TCP connect and TLS handshake timeout in seconds
    pub connect_timeout_seconds: u64,
    /// Whole-request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Idle pooled connection timeout in seconds
    pub pool_idle_timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 512,
            permit_timeout_ms: 500,
            connect_timeout_seconds: 5,
            request_timeout_seconds: 10,
            pool_idle_timeout_seconds: 30,
        }
    }
}

/// `reqwest`-backed [`HttpTransport`] with semaphore-based concurrency control.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_seconds))
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("meridian/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self { client, concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)), config })
    }

    /// Sanitizes network errors to prevent leaking URLs (and embedded API keys) into logs.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    async fn acquire_permit(&self, url: &str) -> Result<PermitGuard, UpstreamError> {
        let permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            UpstreamError::ConcurrencyLimit(format!(
                "no permit within {}ms",
                self.config.permit_timeout_ms
            ))
        })?
        .map_err(|_| UpstreamError::ConcurrencyLimit(url.to_string()))?;

        Ok(PermitGuard { _permit: permit, semaphore: self.concurrent_limit.clone() })
    }

    async fn send(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut request_headers = headers.clone();
        request_headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));

        self.client.post(url).headers(request_headers).body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
            }
        })
    }

    fn body_error(error: &reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::InvalidResponse(Self::sanitize_network_error(error))
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn post(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, UpstreamError> {
        let _guard = self.acquire_permit(url).await?;
        let response = self.send(url, headers, body).await?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| Self::body_error(&e))?;

        tracing::trace!(status = status, body_len = body.len(), "http request completed");
        Ok(HttpResponse { status, body })
    }

    async fn post_limited(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: Bytes,
        max_body: usize,
    ) -> Result<HttpResponse, UpstreamError> {
        let _guard = self.acquire_permit(url).await?;
        let mut response = self.send(url, headers, body).await?;
        let status = response.status().as_u16();

        if let Some(declared) = response.content_length() {
            let declared = usize::try_from(declared).unwrap_or(usize::MAX);
            if declared > max_body {
                return Err(UpstreamError::PayloadTooLarge(declared, max_body));
            }
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| Self::body_error(&e))? {
            if buffer.len() + chunk.len() > max_body {
                return Err(UpstreamError::PayloadTooLarge(buffer.len() + chunk.len(), max_body));
            }
            buffer.extend_from_slice(&chunk);
        }

        tracing::trace!(status = status, body_len = buffer.len(), "http request completed");
        Ok(HttpResponse { status, body: buffer.freeze() })
    }
}

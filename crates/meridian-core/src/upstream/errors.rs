use thiserror::Error;

/// Errors that can occur when polling or selecting upstream RPC providers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the upstream endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error (status > 399).
    ///
    /// First field is the HTTP status code, second is a truncated response body.
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    /// JSON-RPC error object returned by the upstream provider.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// Response from upstream could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The `result` field did not contain a usable block number.
    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(String),

    /// Response body exceeded the network's maximum payload size.
    #[error("Response payload of {0} bytes exceeds limit of {1} bytes")]
    PayloadTooLarge(usize, usize),

    /// No provider of the pool can currently serve traffic.
    #[error("No available upstream")]
    NoAvailableUpstream,

    /// The named network is not registered.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// Request validation failed before being sent to upstream.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No local concurrency permit was available; the upstream was never contacted.
    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(String),

    /// Provider or network definition is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UpstreamError {
    /// HTTP status code carried by this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpError(status, _) => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for HTTP 429, which the health round treats as a soft warning.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpError(429, _))
    }

    /// Returns `true` when the connection target itself could not be reached.
    ///
    /// Any HTTP response, even an error status, proves the target is reachable.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionFailed(_))
    }

    /// Returns `true` when the request was rejected by local load shedding before any
    /// connection attempt. Says nothing about the provider's health.
    #[must_use]
    pub fn is_local_saturation(&self) -> bool {
        matches!(self, Self::ConcurrencyLimit(_))
    }

    /// Static label for metrics and logs.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(429, _) => "rate_limited",
            Self::HttpError(_, _) => "http_error",
            Self::RpcError(_, _) => "rpc_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::InvalidBlockNumber(_) => "invalid_block_number",
            Self::PayloadTooLarge(_, _) => "payload_too_large",
            Self::NoAvailableUpstream => "no_available_upstream",
            Self::UnknownNetwork(_) => "unknown_network",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

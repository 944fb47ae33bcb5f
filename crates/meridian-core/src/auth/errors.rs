use thiserror::Error;

/// Errors raised by session credentials and the session client lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// The credential's usage budget is spent. Sticky until the tracker is reset.
    #[error("Request limit reached")]
    RequestLimit,

    /// The credential's server-assigned lifetime has passed.
    #[error("Session expired")]
    SessionExpired,

    /// The client was stopped.
    #[error("Session closed")]
    SessionClosed,

    /// Every pooled credential is unusable.
    #[error("No tokens available")]
    NoTokensAvailable,

    /// `sign` was called before `start` completed.
    #[error("Session client not started")]
    NotStarted,

    /// `start` was called on a client that already started once.
    #[error("Session client already started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The signing key could not be decoded.
    #[error("Invalid signing key")]
    InvalidKey,

    /// The auth endpoint could not be reached or answered with an error status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The auth endpoint answered with an undecodable body.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The auth endpoint reported an error in its response body.
    #[error("Server error: {0}")]
    Server(String),

    /// The shared usage counter store failed.
    #[error("Usage store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Whether `sign` should move on to another pooled credential after this error.
    #[must_use]
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::RequestLimit | Self::SessionExpired | Self::NoTokensAvailable)
    }

    /// Whether the error stems from configuration and must not be retried.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig(_) | Self::InvalidKey)
    }
}

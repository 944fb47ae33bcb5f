use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

use super::{
    usage::{UsageBackend, UsageTracker},
    SessionError,
};

/// Body POSTed to the auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// EIP-4361 message text.
    pub msg: String,
    /// Hex-encoded 65-byte personal-sign signature.
    pub sig: String,
}

/// Body returned by the auth endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Expiration as unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Permitted uses of the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One session credential: headers to attach plus its lifetime and usage budget.
#[derive(Debug, Clone)]
pub struct AuthToken {
    headers: HeaderMap,
    expiration: Option<DateTime<Utc>>,
    uses: Option<Arc<dyn UsageTracker>>,
    error: Option<SessionError>,
}

impl AuthToken {
    #[must_use]
    pub fn new(
        headers: HeaderMap,
        expiration: Option<DateTime<Utc>>,
        uses: Option<Arc<dyn UsageTracker>>,
    ) -> Self {
        Self { headers, expiration, uses, error: None }
    }

    /// Placeholder for a slot whose acquisition failed: already expired, carrying `error`.
    #[must_use]
    pub fn expired(error: SessionError) -> Self {
        Self { headers: HeaderMap::new(), expiration: Some(Utc::now()), uses: None, error: Some(error) }
    }

    /// Converts an auth endpoint response into a token.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Server`] when the response carries an error message,
    /// [`SessionError::InvalidResponse`] for unusable headers or timestamps, and store errors
    /// from creating the usage tracker.
    pub async fn from_response(
        response: TokenResponse,
        usage: &UsageBackend,
    ) -> Result<Self, SessionError> {
        if let Some(error) = response.error.filter(|e| !e.is_empty()) {
            return Err(SessionError::Server(error));
        }

        let mut headers = HeaderMap::with_capacity(response.headers.len());
        for (name, value) in &response.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| SessionError::InvalidResponse(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| SessionError::InvalidResponse(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }

        let expiration = match response.exp {
            Some(exp) if exp > 0 => Some(DateTime::from_timestamp(exp, 0).ok_or_else(|| {
                SessionError::InvalidResponse(format!("expiration out of range: {exp}"))
            })?),
            _ => None,
        };

        let uses = match response.uses {
            Some(uses) => Some(usage.tracker(&usage_key(&response.headers), uses).await?),
            None => None,
        };

        Ok(Self { headers, expiration, uses, error: None })
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.expiration
    }

    #[must_use]
    pub fn usage(&self) -> Option<&Arc<dyn UsageTracker>> {
        self.uses.as_ref()
    }

    /// Error that produced this placeholder token, if it is one.
    #[must_use]
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|exp| now >= exp)
    }

    /// Checks usability without consuming a use.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionExpired`] or [`SessionError::RequestLimit`].
    pub fn peek(&self) -> Result<(), SessionError> {
        if self.is_expired_at(Utc::now()) {
            return Err(SessionError::SessionExpired);
        }
        self.uses.as_ref().map_or(Ok(()), |uses| uses.peek())
    }

    /// Checks usability and takes one use. Expired tokens never consume.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionExpired`] or [`SessionError::RequestLimit`].
    pub async fn consume(&self) -> Result<(), SessionError> {
        if self.is_expired_at(Utc::now()) {
            return Err(SessionError::SessionExpired);
        }
        match &self.uses {
            Some(uses) => uses.consume().await,
            None => Ok(()),
        }
    }

    /// Copies the token headers onto `headers`, replacing same-named entries.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
    }

    /// Time until the token should be renewed, `renew_before` ahead of expiration.
    ///
    /// `None` for tokens without expiration.
    #[must_use]
    pub fn renew_in(&self, renew_before: Duration, now: DateTime<Utc>) -> Option<Duration> {
        let expiration = self.expiration?;
        let renew_at = expiration - chrono::Duration::from_std(renew_before).unwrap_or(chrono::Duration::zero());
        Some((renew_at - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Stable key of a credential for shared usage accounting: SHA-256 over its sorted headers.
#[must_use]
pub fn usage_key(headers: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, value) in headers {
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

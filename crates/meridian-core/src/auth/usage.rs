use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use super::{
    shared_usage::{DistributedUsageTracker, UsageNotifier},
    SessionError,
};

/// Remaining permitted uses of one credential.
///
/// `consume` must be safe to call concurrently from any number of request handlers.
#[async_trait]
pub trait UsageTracker: Send + Sync + fmt::Debug {
    /// Takes one use, failing with [`SessionError::RequestLimit`] once the budget is spent.
    async fn consume(&self) -> Result<(), SessionError>;

    /// Checks whether a use is currently possible without taking it.
    fn peek(&self) -> Result<(), SessionError>;

    /// Uses left in the locally visible budget.
    fn remaining(&self) -> i64;
}

/// In-process tracker backed by a single atomic counter.
///
/// The counter never goes back up, so exhaustion is permanent.
#[derive(Debug)]
pub struct LocalUsageTracker {
    remaining: AtomicI64,
}

impl LocalUsageTracker {
    #[must_use]
    pub fn new(uses: i64) -> Self {
        Self { remaining: AtomicI64::new(uses) }
    }
}

#[async_trait]
impl UsageTracker for LocalUsageTracker {
    async fn consume(&self) -> Result<(), SessionError> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 0).then(|| n - 1))
            .map(|_| ())
            .map_err(|_| SessionError::RequestLimit)
    }

    fn peek(&self) -> Result<(), SessionError> {
        if self.remaining.load(Ordering::Acquire) > 0 {
            Ok(())
        } else {
            Err(SessionError::RequestLimit)
        }
    }

    fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire).max(0)
    }
}

/// Which usage tracker a session client attaches to metered credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBackendKind {
    #[default]
    Local,
    Shared,
}

/// Factory for usage trackers, resolved from [`UsageBackendKind`] at runtime assembly.
#[derive(Clone)]
pub enum UsageBackend {
    Local,
    Shared { notifier: Arc<UsageNotifier>, batch_size: i64 },
}

impl UsageBackend {
    /// Creates a tracker for the credential identified by `key` with `uses` permitted uses.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] when the shared counter cannot be initialized.
    pub async fn tracker(
        &self,
        key: &str,
        uses: i64,
    ) -> Result<Arc<dyn UsageTracker>, SessionError> {
        match self {
            Self::Local => Ok(Arc::new(LocalUsageTracker::new(uses))),
            Self::Shared { notifier, batch_size } => {
                let tracker =
                    DistributedUsageTracker::create(key, uses, *batch_size, notifier.store()).await?;
                notifier.register(&tracker);
                Ok(tracker)
            }
        }
    }
}

impl fmt::Debug for UsageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Shared { batch_size, .. } => {
                f.debug_struct("Shared").field("batch_size", batch_size).finish_non_exhaustive()
            }
        }
    }
}

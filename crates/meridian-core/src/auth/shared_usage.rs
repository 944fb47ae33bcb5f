//! Usage tracking shared between gateway instances.
//!
//! Each instance keeps a local batch of uses and refills it from a shared counter in
//! `batch_size` steps, so the shared store is touched once per batch rather than once per
//! request. When the shared counter goes negative the instance publishes an exhaustion
//! notice; the [`UsageNotifier`] of every instance fans it out to all local trackers with
//! the same key.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Weak,
    },
};
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{usage::UsageTracker, SessionError};

/// Refill rounds a single `consume` call waits through before giving up.
const MAX_REFILL_ROUNDS: usize = 32;

/// Shared counter backend with a pub/sub channel for exhaustion notices.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Sets `key` to `value` unless it already exists.
    async fn init(&self, key: &str, value: i64) -> Result<(), SessionError>;

    /// Overwrites `key` with `value`.
    async fn set(&self, key: &str, value: i64) -> Result<(), SessionError>;

    /// Subtracts `by` from `key` and returns the new value. Missing keys count as zero.
    async fn decrement(&self, key: &str, by: i64) -> Result<i64, SessionError>;

    /// Announces that `key` is exhausted to every subscriber.
    async fn publish_exhausted(&self, key: &str) -> Result<(), SessionError>;

    /// Receives exhaustion notices published after this call.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

/// In-process [`CounterStore`], shared by every tracker holding the same `Arc`.
pub struct MemoryCounterStore {
    counters: DashMap<String, i64>,
    notices: broadcast::Sender<String>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(256);
        Self { counters: DashMap::new(), notices }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.counters.get(key).map(|v| *v)
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn init(&self, key: &str, value: i64) -> Result<(), SessionError> {
        self.counters.entry(key.to_string()).or_insert(value);
        Ok(())
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), SessionError> {
        self.counters.insert(key.to_string(), value);
        Ok(())
    }

    async fn decrement(&self, key: &str, by: i64) -> Result<i64, SessionError> {
        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_sub(by);
        Ok(*entry)
    }

    async fn publish_exhausted(&self, key: &str) -> Result<(), SessionError> {
        // no subscribers is not an error
        let _ = self.notices.send(key.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.notices.subscribe()
    }
}

/// Tracker drawing uses from a shared counter in batches.
pub struct DistributedUsageTracker {
    key: String,
    batch_size: i64,
    local: AtomicI64,
    exhausted: AtomicBool,
    refilling: AtomicBool,
    refilled: Notify,
    store: Arc<dyn CounterStore>,
}

impl DistributedUsageTracker {
    /// Creates a tracker and seeds the shared counter with `uses` if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for a non-positive batch size and store
    /// errors from seeding.
    pub async fn create(
        key: &str,
        uses: i64,
        batch_size: i64,
        store: Arc<dyn CounterStore>,
    ) -> Result<Arc<Self>, SessionError> {
        if batch_size <= 0 {
            return Err(SessionError::InvalidConfig("usage batch_size must be > 0".into()));
        }
        store.init(key, uses).await?;
        Ok(Arc::new(Self {
            key: key.to_string(),
            batch_size,
            local: AtomicI64::new(0),
            exhausted: AtomicBool::new(false),
            refilling: AtomicBool::new(false),
            refilled: Notify::new(),
            store,
        }))
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// Puts the tracker into the sticky exhausted state.
    pub fn invalidate(&self) {
        self.exhausted.store(true, Ordering::Release);
        self.local.store(0, Ordering::Release);
    }

    /// Clears the exhausted state and sets the shared counter to `uses`.
    ///
    /// # Errors
    ///
    /// Returns store errors from writing the counter.
    pub async fn reset(&self, uses: i64) -> Result<(), SessionError> {
        self.store.set(&self.key, uses).await?;
        self.local.store(0, Ordering::Release);
        self.exhausted.store(false, Ordering::Release);
        info!(key = %self.key, uses, "usage tracker reset");
        Ok(())
    }

    fn take_local(&self) -> bool {
        self.local
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 0).then(|| n - 1))
            .is_ok()
    }

    async fn refill(&self) -> Result<(), SessionError> {
        let remaining = self.store.decrement(&self.key, self.batch_size).await?;
        if remaining < 0 {
            self.invalidate();
            self.store.publish_exhausted(&self.key).await?;
            warn!(key = %self.key, remaining, "shared usage counter exhausted");
            return Err(SessionError::RequestLimit);
        }
        self.local.fetch_add(self.batch_size, Ordering::AcqRel);
        debug!(key = %self.key, remaining, batch = self.batch_size, "usage batch refilled");
        Ok(())
    }
}

#[async_trait]
impl UsageTracker for DistributedUsageTracker {
    async fn consume(&self) -> Result<(), SessionError> {
        for _ in 0..MAX_REFILL_ROUNDS {
            if self.is_exhausted() {
                return Err(SessionError::RequestLimit);
            }
            if self.take_local() {
                return Ok(());
            }

            if self
                .refilling
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let result = self.refill().await;
                self.refilling.store(false, Ordering::Release);
                self.refilled.notify_waiters();
                result?;
            } else {
                let refilled = self.refilled.notified();
                if self.refilling.load(Ordering::Acquire) {
                    refilled.await;
                }
            }
        }
        Err(SessionError::RequestLimit)
    }

    fn peek(&self) -> Result<(), SessionError> {
        if self.is_exhausted() {
            Err(SessionError::RequestLimit)
        } else {
            Ok(())
        }
    }

    fn remaining(&self) -> i64 {
        if self.is_exhausted() {
            0
        } else {
            self.local.load(Ordering::Acquire).max(0)
        }
    }
}

impl std::fmt::Debug for DistributedUsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedUsageTracker")
            .field("key", &self.key)
            .field("batch_size", &self.batch_size)
            .field("exhausted", &self.is_exhausted())
            .finish_non_exhaustive()
    }
}

/// Fans exhaustion notices from the store out to local trackers.
///
/// One subscriber loop per notifier; trackers are held weakly and pruned as they drop.
pub struct UsageNotifier {
    store: Arc<dyn CounterStore>,
    trackers: Mutex<HashMap<String, Vec<Weak<DistributedUsageTracker>>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl UsageNotifier {
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            trackers: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn CounterStore> {
        Arc::clone(&self.store)
    }

    pub fn register(&self, tracker: &Arc<DistributedUsageTracker>) {
        let mut trackers = self.trackers.lock();
        let entry = trackers.entry(tracker.key().to_string()).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        entry.push(Arc::downgrade(tracker));
    }

    /// Invalidates every live tracker registered under `key`. Returns how many were hit.
    pub fn invalidate(&self, key: &str) -> usize {
        let mut trackers = self.trackers.lock();
        let Some(entry) = trackers.get_mut(key) else {
            return 0;
        };
        entry.retain(|weak| weak.strong_count() > 0);
        let mut count = 0;
        for tracker in entry.iter().filter_map(Weak::upgrade) {
            tracker.invalidate();
            count += 1;
        }
        if entry.is_empty() {
            trackers.remove(key);
        }
        count
    }

    /// Spawns the subscriber loop. Later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut notices = self.store.subscribe();
        let notifier = Arc::clone(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    notice = notices.recv() => match notice {
                        Ok(key) => {
                            let count = notifier.invalidate(&key);
                            debug!(key = %key, trackers = count, "usage exhaustion notice");
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "usage notifier lagged behind exhaustion notices");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("usage notifier stopped");
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

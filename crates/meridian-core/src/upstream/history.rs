//! Bounded per-provider block history and the cross-provider reference block.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// Maximum number of samples kept per provider.
pub const HISTORY_CAPACITY: usize = 10;

/// Percentile used to derive the reference block.
pub const REFERENCE_PERCENTILE: f64 = 0.75;

/// One observed chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSample {
    pub block_number: u64,
    pub observed_at: DateTime<Utc>,
}

/// Newest-first history of chain-head samples, capped at [`HISTORY_CAPACITY`].
#[derive(Debug, Clone, Default)]
pub struct BlockHistory {
    samples: VecDeque<BlockSample>,
}

impl BlockHistory {
    pub fn push(&mut self, sample: BlockSample) {
        self.samples.push_front(sample);
        self.samples.truncate(HISTORY_CAPACITY);
    }

    #[must_use]
    pub fn latest(&self) -> Option<&BlockSample> {
        self.samples.front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockSample> {
        self.samples.iter()
    }
}

/// Histories of every provider in a network, keyed by provider host.
///
/// Health-check workers only write their own key; the lock protects the map itself against
/// concurrent registry-driven removal.
#[derive(Debug, Default)]
pub struct CheckedProviders {
    histories: RwLock<HashMap<String, BlockHistory>>,
}

impl CheckedProviders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `block_number` as the newest sample for `host`.
    pub fn record(&self, host: &str, block_number: u64, observed_at: DateTime<Utc>) {
        let mut histories = self.histories.write();
        histories
            .entry(host.to_string())
            .or_default()
            .push(BlockSample { block_number, observed_at });
    }

    #[must_use]
    pub fn get(&self, host: &str) -> Option<BlockHistory> {
        self.histories.read().get(host).cloned()
    }

    #[must_use]
    pub fn latest(&self, host: &str) -> Option<BlockSample> {
        self.histories.read().get(host).and_then(|h| h.latest().copied())
    }

    pub fn remove(&self, host: &str) {
        self.histories.write().remove(host);
    }

    /// Newest sample of every provider with at least one recorded sample.
    #[must_use]
    pub fn latest_samples(&self) -> Vec<(String, BlockSample)> {
        self.histories
            .read()
            .iter()
            .filter_map(|(host, history)| history.latest().map(|s| (host.clone(), *s)))
            .collect()
    }

    /// Block height at `percentile` over every provider's newest sample.
    ///
    /// Returns `0` when nothing has been recorded yet; callers treat that as "no reference".
    #[must_use]
    pub fn percentile_block(&self, percentile: f64) -> u64 {
        let mut blocks: Vec<u64> = self
            .histories
            .read()
            .values()
            .filter_map(|history| history.latest().map(|s| s.block_number))
            .collect();
        percentile_of(&mut blocks, percentile)
    }
}

/// Sorts `blocks` and returns the element at `floor((n - 1) * percentile)`, or `0` if empty.
#[must_use]
pub fn percentile_of(blocks: &mut [u64], percentile: f64) -> u64 {
    if blocks.is_empty() {
        return 0;
    }
    blocks.sort_unstable();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let index = ((blocks.len() - 1) as f64 * percentile.clamp(0.0, 1.0)).floor() as usize;
    blocks[index.min(blocks.len() - 1)]
}

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::provider::Provider;

/// Host-keyed set of providers.
///
/// Uses `ArcSwap` for lock-free reads of the provider list: request-time selection loads a
/// snapshot without contending with the health loop, and registry updates swap in a new list
/// through read-copy-update.
pub struct ProviderSet {
    providers: ArcSwap<Vec<Arc<Provider>>>,
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderSet {
    #[must_use]
    pub fn new() -> Self {
        Self { providers: ArcSwap::from_pointee(Vec::new()) }
    }

    #[must_use]
    pub fn get(&self, host: &str) -> Option<Arc<Provider>> {
        self.providers.load().iter().find(|p| p.host() == host).cloned()
    }

    /// Inserts `provider`, replacing any provider with the same host in its position.
    pub fn upsert(&self, provider: Arc<Provider>) {
        self.providers.rcu(|current| {
            let mut next = (**current).clone();
            match next.iter().position(|p| p.host() == provider.host()) {
                Some(index) => next[index] = Arc::clone(&provider),
                None => next.push(Arc::clone(&provider)),
            }
            next
        });
    }

    /// Removes and returns the provider with `host`.
    pub fn remove(&self, host: &str) -> Option<Arc<Provider>> {
        let previous = self.providers.rcu(|current| {
            current.iter().filter(|p| p.host() != host).cloned().collect::<Vec<_>>()
        });
        previous.iter().find(|p| p.host() == host).cloned()
    }

    /// Current providers in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<Provider>>> {
        self.providers.load_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.load().is_empty()
    }
}

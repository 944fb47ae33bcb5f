//! Request-time upstream selection for the hosting proxy.
//!
//! The proxy calls [`UpstreamSelector::annotate`] once per request to attach the candidate
//! pool, then [`UpstreamSelector::select`] on every attempt to pick one member and rewrite
//! the request for it.

use http::{uri::PathAndQuery, Request, Uri};
use std::sync::Arc;

use super::{affinity::affinity_index, provider::Provider, registry::NetworkRegistry, UpstreamError};

/// Candidate providers attached to a request by [`UpstreamSelector::annotate`].
#[derive(Debug, Clone, Default)]
pub struct ProviderPool {
    network: String,
    providers: Vec<Arc<Provider>>,
}

impl ProviderPool {
    #[must_use]
    pub fn new(network: impl Into<String>, providers: Vec<Arc<Provider>>) -> Self {
        Self { network: network.into(), providers }
    }

    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    #[must_use]
    pub fn providers(&self) -> &[Arc<Provider>] {
        &self.providers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Available providers of the most preferred priority tier that has any.
///
/// Tiers are visited from the lowest priority number upward. When no provider is available
/// at all, every provider is returned so degraded traffic can still be attempted.
#[must_use]
pub fn tiered_upstreams(providers: &[Arc<Provider>]) -> Vec<Arc<Provider>> {
    let mut tiers: Vec<u32> = providers.iter().map(|p| p.priority()).collect();
    tiers.sort_unstable();
    tiers.dedup();

    for tier in tiers {
        let available: Vec<_> = providers
            .iter()
            .filter(|p| p.priority() == tier && p.available())
            .cloned()
            .collect();
        if !available.is_empty() {
            return available;
        }
    }
    providers.to_vec()
}

/// Picks upstream providers for incoming requests.
pub struct UpstreamSelector {
    registry: Arc<NetworkRegistry>,
}

impl UpstreamSelector {
    #[must_use]
    pub fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self { registry }
    }

    /// Stores the tier-filtered provider pool of `network` in the request extensions.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::UnknownNetwork`] when `network` is not registered.
    pub fn annotate<B>(&self, request: &mut Request<B>, network: &str) -> Result<(), UpstreamError> {
        let network = self
            .registry
            .get_network(network)
            .ok_or_else(|| UpstreamError::UnknownNetwork(network.to_string()))?;
        let pool = ProviderPool::new(network.name(), tiered_upstreams(&network.providers()));
        tracing::trace!(network = %network.name(), candidates = pool.len(), "annotated request");
        request.extensions_mut().insert(pool);
        Ok(())
    }

    /// Pool previously attached by [`Self::annotate`].
    #[must_use]
    pub fn get_upstreams<B>(request: &Request<B>) -> Option<&ProviderPool> {
        request.extensions().get::<ProviderPool>()
    }

    /// Picks one provider from `pool` and rewrites `request` for it.
    ///
    /// Session affinity picks among available members, falling back to members whose
    /// connection target is still reachable. The request path is replaced by the provider's
    /// path (query kept) and the provider's headers are inserted.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::NoAvailableUpstream`] when no member can take traffic.
    pub fn select<B>(
        pool: &ProviderPool,
        request: &mut Request<B>,
    ) -> Result<Arc<Provider>, UpstreamError> {
        let mut candidates: Vec<&Arc<Provider>> =
            pool.providers().iter().filter(|p| p.available()).collect();
        if candidates.is_empty() {
            candidates = pool.providers().iter().filter(|p| p.is_reachable()).collect();
        }

        let index = affinity_index(request.headers(), candidates.len())
            .ok_or(UpstreamError::NoAvailableUpstream)?;
        let provider = Arc::clone(candidates[index]);

        rewrite_path(request, provider.path())?;
        for (name, value) in provider.headers() {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        tracing::debug!(
            network = %pool.network(),
            provider = %provider.host(),
            available = provider.available(),
            "selected upstream"
        );
        Ok(provider)
    }
}

fn rewrite_path<B>(request: &mut Request<B>, path: &str) -> Result<(), UpstreamError> {
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let path_and_query = PathAndQuery::try_from(path_and_query)
        .map_err(|e| UpstreamError::InvalidRequest(format!("invalid upstream path: {e}")))?;

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    *request.uri_mut() = Uri::from_parts(parts)
        .map_err(|e| UpstreamError::InvalidRequest(format!("invalid upstream uri: {e}")))?;
    Ok(())
}

//! Integration tests for usage budgets shared between gateway instances.
//!
//! Each "instance" is a `SessionAuthClient` with its own `UsageNotifier`; the instances
//! only share a counter store, the way separate processes would share Redis.

use crate::mock_infrastructure::{
    AuthMockBuilder, CountingTransport, RecordingMetrics, TEST_PRIVATE_KEY,
};
use http::HeaderMap;
use meridian_core::auth::{
    token::usage_key, CounterStore, MemoryCounterStore, SessionAuthClient, SessionClientConfig,
    SessionError, UsageBackend, UsageNotifier,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

const CREDENTIAL: (&str, &str) = ("Authorization", "Bearer shared");

struct Instance {
    client: SessionAuthClient,
    notifier: Arc<UsageNotifier>,
}

impl Instance {
    async fn start(auth: &AuthMockBuilder, store: &Arc<MemoryCounterStore>, batch_size: i64) -> Self {
        let notifier = Arc::new(UsageNotifier::new(Arc::clone(store) as Arc<dyn CounterStore>));
        notifier.start();
        let client = SessionAuthClient::new(
            SessionClientConfig::new("shared", auth.auth_url(), TEST_PRIVATE_KEY),
            CountingTransport::http(),
            UsageBackend::Shared { notifier: Arc::clone(&notifier), batch_size },
            RecordingMetrics::new(),
        );
        client.start().await.unwrap();
        Self { client, notifier }
    }

    async fn sign(&self) -> Result<(), SessionError> {
        self.client.sign_headers(&mut HeaderMap::new()).await
    }

    fn stop(&self) {
        self.client.stop();
        self.notifier.stop();
    }
}

fn credential_key() -> String {
    let headers: BTreeMap<String, String> =
        [(CREDENTIAL.0.to_string(), CREDENTIAL.1.to_string())].into_iter().collect();
    usage_key(&headers)
}

#[tokio::test]
async fn test_instances_draw_from_one_budget() {
    let mut auth = AuthMockBuilder::new().await;
    auth.mock_token(&[CREDENTIAL], None, Some(6)).await;
    let store = Arc::new(MemoryCounterStore::new());

    let a = Instance::start(&auth, &store, 2).await;
    let b = Instance::start(&auth, &store, 2).await;
    assert_eq!(store.get(&credential_key()), Some(6), "second instance must not reseed");

    a.sign().await.unwrap();
    assert_eq!(store.get(&credential_key()), Some(4));
    b.sign().await.unwrap();
    assert_eq!(store.get(&credential_key()), Some(2));

    a.sign().await.unwrap();
    b.sign().await.unwrap();
    assert_eq!(store.get(&credential_key()), Some(2), "local batches absorb the second use");

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_exhaustion_on_one_instance_invalidates_the_other() {
    let mut auth = AuthMockBuilder::new().await;
    auth.mock_token(&[CREDENTIAL], None, Some(4)).await;
    let store = Arc::new(MemoryCounterStore::new());

    let a = Instance::start(&auth, &store, 2).await;
    let b = Instance::start(&auth, &store, 2).await;
    assert!(b.client.error().is_none());

    for _ in 0..4 {
        a.sign().await.unwrap();
    }
    assert_eq!(a.sign().await.unwrap_err(), SessionError::RequestLimit);
    assert!(store.get(&credential_key()).is_some_and(|remaining| remaining < 0));

    let invalidated = tokio::time::timeout(Duration::from_secs(2), async {
        while b.client.error().is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(invalidated.is_ok(), "exhaustion notice never reached the second instance");
    assert_eq!(b.client.error(), Some(SessionError::NoTokensAvailable));
    assert_eq!(b.sign().await.unwrap_err(), SessionError::RequestLimit);

    a.stop();
    b.stop();
}

#[tokio::test]
async fn test_unrelated_credentials_are_not_invalidated() {
    let mut auth = AuthMockBuilder::new().await;
    auth.mock_token(&[CREDENTIAL], None, Some(1)).await;
    let store = Arc::new(MemoryCounterStore::new());
    let a = Instance::start(&auth, &store, 1).await;

    auth.mock_token(&[("Authorization", "Bearer other")], None, Some(10)).await;
    let b = Instance::start(&auth, &store, 1).await;

    a.sign().await.unwrap();
    assert_eq!(a.sign().await.unwrap_err(), SessionError::RequestLimit);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(b.client.error().is_none());
    b.sign().await.unwrap();

    a.stop();
    b.stop();
}

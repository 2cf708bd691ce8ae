// src/cache.rs

use crate::client::KeySetFetcher;
use crate::clock::Clock;
use crate::config::KeySourceConfig;
use crate::error::{FetchError, KeyLookupError};
use crate::model::{JsonWebKeySet, SigningKey};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

type InflightRefresh = Shared<BoxFuture<'static, Result<Arc<KeySetSnapshot>, FetchError>>>;

/// A key that was published in an earlier snapshot but is missing from the current one.
#[derive(Debug, Clone)]
struct RetiredKey {
    key: Arc<SigningKey>,
    retired_at: DateTime<Utc>,
}

/// An immutable view of the published key set at one point in time.
#[derive(Debug, Default)]
pub struct KeySetSnapshot {
    keys: Vec<Arc<SigningKey>>,
    retired: Vec<RetiredKey>,
    fetched_at: Option<DateTime<Utc>>,
}

impl KeySetSnapshot {
    /// Builds the successor of `previous` from a freshly fetched document.
    ///
    /// Unusable entries are skipped. Keys of `previous` that are no longer published
    /// are kept as retired until they have been gone for longer than `grace`.
    pub fn from_document(
        document: &JsonWebKeySet,
        previous: &KeySetSnapshot,
        fetched_at: DateTime<Utc>,
        grace: Duration,
    ) -> Self {
        let mut keys: Vec<Arc<SigningKey>> = Vec::with_capacity(document.keys.len());
        for jwk in &document.keys {
            match SigningKey::try_from(jwk) {
                Ok(key) => {
                    if keys.iter().any(|k| k.key_id() == key.key_id()) {
                        warn!(kid = %key.key_id(), "Skipping duplicate key id in key set");
                        continue;
                    }
                    keys.push(Arc::new(key));
                }
                Err(reason) => {
                    warn!(kid = ?jwk.kid, %reason, "Skipping unusable key set entry");
                }
            }
        }

        let published = |kid: &str| keys.iter().any(|k| k.key_id() == kid);
        let mut retired: Vec<RetiredKey> = previous
            .retired
            .iter()
            .filter(|r| !published(r.key.key_id()) && within(r.retired_at, fetched_at, grace))
            .cloned()
            .collect();
        for key in &previous.keys {
            if !published(key.key_id()) {
                debug!(kid = %key.key_id(), "Key no longer published, retiring");
                retired.push(RetiredKey {
                    key: Arc::clone(key),
                    retired_at: fetched_at,
                });
            }
        }

        Self {
            keys,
            retired,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Published keys, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &Arc<SigningKey>> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Looks up a published key, or a retired one still inside its grace period.
    pub fn find(&self, kid: &str, now: DateTime<Utc>, grace: Duration) -> Option<Arc<SigningKey>> {
        if let Some(key) = self.keys.iter().find(|k| k.key_id() == kid) {
            return Some(Arc::clone(key));
        }
        self.retired
            .iter()
            .find(|r| r.key.key_id() == kid && within(r.retired_at, now, grace))
            .map(|r| Arc::clone(&r.key))
    }

    /// True while the snapshot is younger than `ttl`. The initial empty snapshot is never fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| within(at, now, ttl))
    }
}

/// `since + span >= now`, treating timestamps in the future as elapsed zero.
fn within(since: DateTime<Utc>, now: DateTime<Utc>, span: Duration) -> bool {
    let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
    elapsed <= span
}

/// Caches the identity provider's signing keys with bounded staleness.
///
/// Cheap to clone; clones share the same snapshot and in-flight refresh.
#[derive(Clone)]
pub struct KeySetCache {
    inner: Arc<Inner>,
}

struct Inner {
    fetcher: Arc<dyn KeySetFetcher>,
    clock: Arc<dyn Clock>,
    policy: KeySourceConfig,
    current: ArcSwap<KeySetSnapshot>,
    inflight: Mutex<Option<InflightRefresh>>,
}

impl KeySetCache {
    /// Creates an empty cache. Nothing is fetched until the first lookup or `refresh`.
    pub fn new(
        fetcher: Arc<dyn KeySetFetcher>,
        policy: KeySourceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                clock,
                policy,
                current: ArcSwap::from_pointee(KeySetSnapshot::default()),
                inflight: Mutex::new(None),
            }),
        }
    }

    /// The snapshot currently served to lookups.
    pub fn snapshot(&self) -> Arc<KeySetSnapshot> {
        self.inner.current.load_full()
    }

    /// Retrieves the signing key for `kid`.
    ///
    /// A fresh snapshot answers directly. A stale snapshot, or a key missing from a
    /// snapshot older than the refresh cooldown, triggers a refresh first. When that
    /// refresh fails, a key still present in the stale snapshot is served anyway.
    #[instrument(skip(self))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<SigningKey>, KeyLookupError> {
        let policy = &self.inner.policy;
        let now = self.inner.clock.now();
        let observed = self.snapshot();

        if observed.is_fresh(now, policy.cache_ttl) {
            if let Some(key) = observed.find(kid, now, policy.grace_period) {
                debug!("Key set cache hit");
                return Ok(key);
            }
            if observed.is_fresh(now, policy.refresh_cooldown) {
                debug!("Key missing from a just-fetched key set");
                return Err(KeyLookupError::NotFound);
            }
            debug!("Key missing from key set, refreshing");
        } else {
            debug!("Key set is stale, refreshing");
        }

        match self.refresh_after(&observed).await {
            Ok(snapshot) => match snapshot.find(kid, self.inner.clock.now(), policy.grace_period) {
                Some(key) => Ok(key),
                None => {
                    debug!("Key not found after refresh");
                    Err(KeyLookupError::NotFound)
                }
            },
            Err(e) => match observed.find(kid, now, policy.grace_period) {
                Some(key) => {
                    warn!(error = %e, "Key set refresh failed, serving cached key");
                    Ok(key)
                }
                None => Err(KeyLookupError::Fetch(e)),
            },
        }
    }

    /// Fetches the key set now and swaps it in.
    ///
    /// Joins a refresh that is already in flight instead of starting another.
    /// On failure the current snapshot is left untouched.
    #[instrument(skip(self), err)]
    pub async fn refresh(&self) -> Result<Arc<KeySetSnapshot>, FetchError> {
        let refresh = {
            let mut slot = self.inner.inflight.lock();
            self.join_or_start(&mut slot)
        };
        refresh.await
    }

    /// Refreshes unless another caller already replaced `observed` in the meantime.
    async fn refresh_after(
        &self,
        observed: &Arc<KeySetSnapshot>,
    ) -> Result<Arc<KeySetSnapshot>, FetchError> {
        let refresh = {
            let mut slot = self.inner.inflight.lock();
            let current = self.snapshot();
            if !Arc::ptr_eq(&current, observed) {
                debug!("Key set was refreshed concurrently, reusing it");
                return Ok(current);
            }
            self.join_or_start(&mut slot)
        };
        refresh.await
    }

    fn join_or_start(&self, slot: &mut Option<InflightRefresh>) -> InflightRefresh {
        if let Some(refresh) = slot.as_ref() {
            return refresh.clone();
        }
        let inner = Arc::clone(&self.inner);
        let refresh = async move {
            let result = fetch_snapshot(&inner).await;
            // The snapshot is swapped before the slot clears, so a caller that
            // finds the slot empty always observes the outcome.
            inner.inflight.lock().take();
            result
        }
        .boxed()
        .shared();
        *slot = Some(refresh.clone());
        refresh
    }

    /// Starts a task that refreshes the key set at 80% of the TTL, backing off
    /// exponentially while the provider is unreachable.
    ///
    /// Must be called from within a Tokio runtime. The task runs until aborted.
    pub fn spawn_refresher(&self) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move { cache.refresh_loop().await })
    }

    async fn refresh_loop(&self) {
        let base_retry_delay = Duration::from_secs(5);
        let max_retry_delay = Duration::from_secs(300);
        let mut current_retry_delay = base_retry_delay;

        loop {
            match self.refresh().await {
                Ok(snapshot) => {
                    current_retry_delay = base_retry_delay;
                    let interval = self.inner.policy.cache_ttl.mul_f64(0.8);
                    debug!(keys = snapshot.len(), "Next background key set refresh in {:?}", interval);
                    tokio::time::sleep(interval).await;
                }
                Err(e) => {
                    error!("Failed to refresh key set in background: {}. Retrying in {:?}.", e, current_retry_delay);
                    tokio::time::sleep(current_retry_delay).await;
                    current_retry_delay = (current_retry_delay * 2).min(max_retry_delay);
                }
            }
        }
    }
}

async fn fetch_snapshot(inner: &Inner) -> Result<Arc<KeySetSnapshot>, FetchError> {
    let document = match tokio::time::timeout(inner.policy.fetch_timeout, inner.fetcher.fetch()).await
    {
        Ok(result) => result?,
        Err(_) => return Err(FetchError::Timeout),
    };

    let previous = inner.current.load_full();
    let snapshot = Arc::new(KeySetSnapshot::from_document(
        &document,
        &previous,
        inner.clock.now(),
        inner.policy.grace_period,
    ));
    inner.current.store(Arc::clone(&snapshot));

    info!(
        keys = snapshot.len(),
        retired = snapshot.retired.len(),
        "Key set snapshot replaced"
    );
    Ok(snapshot)
}

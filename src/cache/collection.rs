//! Get-or-fetch coordination for one category
//!
//! A `Collection` pairs a category's [`Store`] with its [`FlightMap`]: a
//! fresh entry is returned without suspending, otherwise the caller joins or
//! registers the single in-flight fetch for that key. Successful results are
//! committed to the store inside the flight, so the value is cached exactly
//! once no matter how many callers shared the fetch; failures are never
//! cached.

use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use std::future::Future;
use tracing::{debug, warn};

use super::category::CacheCategory;
use super::flight::FlightMap;
use super::store::Store;
use crate::error::CacheError;
use crate::lock;
use crate::source::BoxError;

/// A category's store plus its in-flight fetch registrations.
///
/// Clones share state, so a collection can be handed to detached gather tasks
/// while the manager keeps using it.
pub(crate) struct Collection<K, V> {
    category: CacheCategory,
    store: Arc<Mutex<Store<K, V>>>,
    flights: FlightMap<K, V>,
}

impl<K, V> Clone for Collection<K, V> {
    fn clone(&self) -> Self {
        Self {
            category: self.category,
            store: Arc::clone(&self.store),
            flights: self.flights.clone(),
        }
    }
}

impl<K, V> Collection<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(category: CacheCategory) -> Self {
        Self {
            category,
            store: Arc::new(Mutex::new(Store::new(category))),
            flights: FlightMap::new(),
        }
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    /// Runs `f` with the locked store. The guard must never be held across an
    /// await point; keeping this the only access path makes that easy to see.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store<K, V>) -> R) -> R {
        f(&mut lock(&self.store))
    }

    /// Returns the fresh value for `key`, if any. No side effects.
    pub fn fresh(&self, key: &K) -> Option<V> {
        let now = Utc::now();
        self.with_store(|store| store.get(key, now).map(|entry| entry.value.clone()))
    }

    /// Returns the value for `key` regardless of staleness.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.with_store(|store| {
            store
                .get_ignoring_staleness(key)
                .map(|entry| entry.value.clone())
        })
    }

    /// Drops every entry in the category.
    pub fn clear(&self) {
        self.with_store(|store| store.clear());
    }

    /// Returns a fresh value for `key`, fetching from upstream at most once
    /// per key even under concurrent demand.
    ///
    /// `alias` may name a second key to store the value under in lock-step
    /// (the "latest" alias resolving to its concrete name); it runs inside
    /// the shared flight, on the fetched value, before any waiter resolves.
    pub async fn get_or_fetch<F, Fut, A>(
        &self,
        key: K,
        fetch: F,
        alias: A,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
        A: FnOnce(&V) -> Option<K> + Send + 'static,
    {
        let category = self.category;

        if let Some(value) = self.fresh(&key) {
            debug!(%category, "already cached");
            return Ok(value);
        }
        debug!(%category, "cache is missing or stale, fetching");

        let store = Arc::clone(&self.store);
        let flight_key = key.clone();
        let upstream = fetch();
        self.flights
            .run(flight_key, async move {
                match upstream.await {
                    Ok(value) => {
                        let now = Utc::now();
                        let mut store = lock(&store);
                        if let Some(alias_key) = alias(&value) {
                            if alias_key != key {
                                store.put(alias_key, value.clone(), now);
                            }
                        }
                        store.put(key, value.clone(), now);
                        debug!(%category, "renewed cache");
                        Ok(value)
                    }
                    Err(err) => {
                        warn!(%category, error = %err, "upstream fetch failed");
                        Err(CacheError::upstream(err))
                    }
                }
            })
            .await
    }
}

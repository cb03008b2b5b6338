//! Single-flight registration
//!
//! Guarantees at most one in-flight operation per key: the first caller
//! registers a shared handle and spawns the work as a detached task; every
//! concurrent caller for the same key awaits that handle instead of starting
//! its own. The work runs in its own `tokio` task, so a waiter abandoning its
//! wait (its request timed out, say) never aborts work other waiters depend
//! on. The map lock guards bookkeeping only and is never held across the
//! upstream call itself.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use tokio::sync::oneshot;

use crate::error::CacheError;
use crate::lock;

type FlightHandle<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Map of key to shared, awaitable in-flight operation.
pub(crate) struct FlightMap<K, V> {
    flights: Arc<Mutex<HashMap<K, FlightHandle<V>>>>,
}

impl<K, V> Clone for FlightMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<K, V> Default for FlightMap<K, V> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the flight registration when the driving task exits, whether it
/// completed, failed, or panicked.
struct Deregister<K, V>
where
    K: Eq + Hash,
{
    flights: Arc<Mutex<HashMap<K, FlightHandle<V>>>>,
    key: K,
}

impl<K, V> Drop for Deregister<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        lock(&self.flights).remove(&self.key);
    }
}

impl<K, V> FlightMap<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the in-flight operation for `key`, or registers `work` as a new
    /// one and awaits it.
    ///
    /// `work` is polled at most once per registration: when a flight already
    /// exists the supplied future is dropped unpolled. The registration is
    /// removed before waiters resolve, so after a failure the very next call
    /// starts a fresh attempt; failures are never left behind in the map.
    pub async fn run<F>(&self, key: K, work: F) -> Result<V, CacheError>
    where
        F: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        let handle = {
            let mut flights = lock(&self.flights);
            if let Some(existing) = flights.get(&key) {
                existing.clone()
            } else {
                let (tx, rx) = oneshot::channel::<Result<V, CacheError>>();
                let handle: FlightHandle<V> = async move {
                    rx.await.unwrap_or(Err(CacheError::FetchAborted))
                }
                .boxed()
                .shared();
                flights.insert(key.clone(), handle.clone());

                let guard = Deregister {
                    flights: Arc::clone(&self.flights),
                    key,
                };
                tokio::spawn(async move {
                    let result = work.await;
                    // Deregister before waking waiters: anyone arriving after
                    // the result is visible must start a fresh flight, not
                    // observe this finished one.
                    drop(guard);
                    let _ = tx.send(result);
                });
                handle
            }
        };

        handle.await
    }

    /// Number of currently registered flights.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.flights).len()
    }
}

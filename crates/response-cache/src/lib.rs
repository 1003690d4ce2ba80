//! Short-lived cache for read endpoints
//!
//! Entries are fresh for [`DEFAULT_TTL`] and are never evicted on a timer.
//! A stale entry is still useful: when a refetch fails, the last good value
//! is served instead of the error.
//!
//! Concurrent `get` calls for one key share a single producer future, so a
//! burst of identical reads costs one backend request.
//!
//! Values are stored as JSON so one cache can hold responses of any
//! serializable type.
//!
//! Keys are plain strings built by [`cache_key`]. Two keys for semantically
//! equal parameters in a different order are distinct entries.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Clock, MutexExt};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Value,
    /// Unix milliseconds when the entry was written
    pub timestamp: u64,
}

type InFlight<E> = Shared<BoxFuture<'static, Result<Value, E>>>;

pub struct ResponseCache<E> {
    entries: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, InFlight<E>>>,
    clock: Arc<dyn Clock>,
    ttl_millis: u64,
}

impl<E> ResponseCache<E>
where
    E: Clone + Send + Sync + From<serde_json::Error> + 'static,
{
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, DEFAULT_TTL)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            clock,
            ttl_millis: ttl.as_millis() as u64,
        }
    }

    /// Return the cached value for `key`, or run `producer` to fetch it.
    ///
    /// With `use_cache` false the producer is awaited directly and the cache
    /// is neither read nor written.
    pub async fn get<T, F, Fut>(&self, key: &str, producer: F, use_cache: bool) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if !use_cache {
            return producer().await;
        }

        if let Some(data) = self.fresh(key) {
            debug!(key, "cache hit");
            metrics::counter!("response_cache_hits_total").increment(1);
            return decode(data);
        }

        let fetch = {
            let mut in_flight = self.in_flight.lock_or_recover();
            match in_flight.get(key) {
                Some(shared) => {
                    debug!(key, "joining in-flight fetch");
                    metrics::counter!("response_cache_coalesced_total").increment(1);
                    shared.clone()
                }
                None => {
                    debug!(key, "cache miss");
                    metrics::counter!("response_cache_misses_total").increment(1);
                    let fut = producer();
                    let shared = async move {
                        let value = fut.await?;
                        serde_json::to_value(value).map_err(E::from)
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_owned(), shared.clone());
                    shared
                }
            }
        };

        let result = fetch.clone().await;
        self.settle(key, &fetch, &result);

        match result {
            Ok(data) => decode(data),
            Err(e) => match self.entry(key) {
                Some(stale) => {
                    warn!(key, stored_at = stale.timestamp, "fetch failed, serving stale entry");
                    metrics::counter!("response_cache_stale_served_total").increment(1);
                    decode(stale.data)
                }
                None => Err(e),
            },
        }
    }

    /// Drop one entry, or everything when `key` is `None`.
    pub fn clear(&self, key: Option<&str>) {
        let mut entries = self.entries.lock_or_recover();
        match key {
            Some(key) => {
                entries.remove(key);
            }
            None => entries.clear(),
        }
        debug!(key = key.unwrap_or("*"), "cache cleared");
    }

    /// The stored entry for `key`, fresh or stale.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock_or_recover().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let entries = self.entries.lock_or_recover();
        let entry = entries.get(key)?;
        (now.saturating_sub(entry.timestamp) < self.ttl_millis).then(|| entry.data.clone())
    }

    /// Whichever waiter gets here first for this fetch records the result
    /// and retires the in-flight slot. The entry is written before the slot
    /// is removed, so a concurrent caller always finds one or the other.
    fn settle(&self, key: &str, fetch: &InFlight<E>, result: &Result<Value, E>) {
        let mut in_flight = self.in_flight.lock_or_recover();
        let ours = in_flight
            .get(key)
            .is_some_and(|current| current.ptr_eq(fetch));
        if !ours {
            return;
        }

        if let Ok(data) = result {
            let entry = CacheEntry {
                data: data.clone(),
                timestamp: self.clock.now_millis(),
            };
            self.entries.lock_or_recover().insert(key.to_owned(), entry);
        }
        in_flight.remove(key);
    }
}

fn decode<T: DeserializeOwned, E: From<serde_json::Error>>(data: Value) -> Result<T, E> {
    serde_json::from_value(data).map_err(E::from)
}

/// Build a key of the form `endpoint-p1-p2`.
pub fn cache_key<I, S>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = endpoint.to_owned();
    for param in params {
        key.push('-');
        key.push_str(param.as_ref());
    }
    key
}

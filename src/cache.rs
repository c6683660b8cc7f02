//! A read-through cache in front of a [`Fetcher`].

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::data::{KeySet, Record, Records, ValueSet};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;

/// Presence policy for a [`CacheThrough`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When true (the default), `NotFound` and `Error` records are cached
    /// like found ones, so a key that resolved negatively is not fetched
    /// again. When false only `Found` records are kept and negative keys are
    /// re-fetched on every request.
    pub cache_negative_results: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_negative_results: true,
        }
    }
}

type Entries<Key, Value> = HashMap<Key, Record<Value>>;

/// Wraps a [`Fetcher`] so that keys are only ever fetched once.
///
/// Each request is split into keys already in the cache and keys that
/// aren't; only the misses are passed on to the wrapped fetcher. Fresh
/// records are published to the cache as a single copy-on-write update, so
/// a concurrent reader sees either none or all of a fetch's records. The
/// cache has no expiry: entries live until they are overwritten,
/// invalidated, or the cache is dropped.
///
/// Wrapping a [`Coalescer`](crate::Coalescer) is the usual arrangement:
/// concurrent misses for the same keys then share one fetch.
pub struct CacheThrough<F: Fetcher> {
    fetcher: F,
    config: CacheConfig,
    entries: ArcSwap<Entries<F::Key, F::Value>>,
}

impl<F: Fetcher> Debug for CacheThrough<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheThrough")
            .field("fetcher", &"<fetcher>")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

impl<F: Fetcher> CacheThrough<F> {
    pub fn new(fetcher: F, config: CacheConfig) -> Self {
        Self {
            fetcher,
            config,
            entries: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &F {
        &self.fetcher
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    fn keeps(&self, record: &Record<F::Value>) -> bool {
        record.is_found() || self.config.cache_negative_results
    }

    /// The cached record for a key, if there is one.
    pub fn get(&self, key: &F::Key) -> Option<Record<F::Value>> {
        self.entries.load().get(key).cloned()
    }

    /// Write a record for a key, replacing any cached one. Used to keep the
    /// cache current after a mutation made through some other path. A
    /// record the presence policy doesn't keep still evicts the cached one.
    pub fn insert(&self, key: F::Key, record: Record<F::Value>) {
        self.insert_many(Some((key, record)))
    }

    pub fn insert_many(&self, records: impl IntoIterator<Item = (F::Key, Record<F::Value>)>) {
        self.publish(records.into_iter().collect());
    }

    /// Drop the cached records for some keys, so that they are fetched again
    /// on their next request.
    pub fn invalidate(&self, keys: impl IntoIterator<Item = F::Key>) {
        let keys: KeySet<F::Key> = keys.into_iter().collect();
        if keys.is_empty() {
            return;
        }

        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.retain(|key, _record| !keys.contains(key));
            next
        });
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    // Every record either replaces the cached one or, if the presence policy
    // doesn't keep it, evicts it.
    fn publish(&self, records: Vec<(F::Key, Record<F::Value>)>) {
        if records.is_empty() {
            return;
        }

        let (kept, evicted): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|(_key, record)| self.keeps(record));
        let evicted: KeySet<F::Key> = evicted.into_iter().map(|(key, _record)| key).collect();

        // rcu may run the closure more than once if another writer races us,
        // so the records are cloned in rather than moved.
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.retain(|key, _record| !evicted.contains(key));
            next.extend(kept.iter().cloned());
            next
        });
    }

    /// Request a set of keys, fetching only those not already cached.
    pub async fn load_many(
        &self,
        keys: impl IntoIterator<Item = F::Key>,
    ) -> Result<Records<F::Key, F::Value>> {
        self.fetch_through(keys.into_iter().collect()).await
    }

    /// Request a single key.
    pub async fn load(&self, key: F::Key) -> Result<Record<F::Value>> {
        let mut records = self.load_many(Some(key.clone())).await?.into_map();
        Ok(records.remove(&key).unwrap_or(Record::Error(Error::Missing)))
    }

    async fn fetch_through(&self, keys: KeySet<F::Key>) -> Result<Records<F::Key, F::Value>> {
        let mut hits = HashMap::with_capacity(keys.len());
        let mut misses = KeySet::new();

        {
            let entries = self.entries.load();
            for key in keys {
                match entries.get(&key) {
                    Some(record) => {
                        hits.insert(key, record.clone());
                    }
                    None => {
                        misses.insert(key);
                    }
                }
            }
        }

        if misses.is_empty() {
            trace!(hits = hits.len(), "served entirely from cache");
            return Ok(ValueSet::from_map(hits));
        }

        debug!(hits = hits.len(), misses = misses.len(), "fetching cache misses");

        let requested = misses.clone();
        let mut fresh = self.fetcher.fetch(misses).await?.into_map();
        fresh.retain(|key, _record| requested.contains(key));

        // Publish everything the fetch produced in one step, before any of
        // it is handed back.
        self.publish(
            fresh
                .iter()
                .map(|(key, record)| (key.clone(), record.clone()))
                .collect(),
        );

        for key in requested {
            fresh.entry(key).or_insert_with_key(|key| {
                warn!(?key, "fetcher returned no record for a requested key");
                Record::Error(Error::Missing)
            });
        }

        fresh.extend(hits);
        Ok(ValueSet::from_map(fresh))
    }
}

#[async_trait]
impl<F: Fetcher> Fetcher for CacheThrough<F> {
    type Key = F::Key;
    type Value = F::Value;

    async fn fetch(&self, keys: KeySet<F::Key>) -> Result<Records<F::Key, F::Value>> {
        self.fetch_through(keys).await
    }
}

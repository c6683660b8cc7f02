//! The fetcher contract: an asynchronous bulk lookup from a set of keys to
//! one record per key.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{KeySet, Records};
use crate::error::Result;

/// An asynchronous bulk lookup.
///
/// Implementations receive a deduplicated [`KeySet`] of arbitrary size in an
/// arbitrary order, and must return one [`Record`](crate::Record) per
/// requested key. A key that doesn't exist is reported as
/// `Record::NotFound`, and a key that failed on its own as `Record::Error`;
/// returning `Err` fails the whole lookup for every key.
///
/// [`Coalescer`](crate::Coalescer) and [`CacheThrough`](crate::CacheThrough)
/// both wrap a fetcher and are fetchers themselves, so they stack.
#[async_trait]
pub trait Fetcher: Send + Sync {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    async fn fetch(&self, keys: KeySet<Self::Key>) -> Result<Records<Self::Key, Self::Value>>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    type Key = F::Key;
    type Value = F::Value;

    async fn fetch(&self, keys: KeySet<Self::Key>) -> Result<Records<Self::Key, Self::Value>> {
        (**self).fetch(keys).await
    }
}

/// A [`Fetcher`] backed by a plain async function or closure. Create one with
/// [`fetch_fn`].
pub struct FetchFn<Key, F> {
    fetch: F,
    _key: PhantomData<fn(Key)>,
}

/// Adapt an async function taking a [`KeySet`] into a [`Fetcher`].
///
/// ```
/// use graphloader::{fetch_fn, KeySet, Records, Result};
///
/// async fn stringify(keys: KeySet<u32>) -> Result<Records<u32, String>> {
///     let found: Vec<(u32, String)> = keys.keys().map(|key| (*key, key.to_string())).collect();
///     Ok(keys.records_from_iter(found))
/// }
///
/// let fetcher = fetch_fn(stringify);
/// ```
pub fn fetch_fn<Key, Value, F, Fut>(fetch: F) -> FetchFn<Key, F>
where
    Key: Eq + Hash,
    F: Fn(KeySet<Key>) -> Fut,
    Fut: Future<Output = Result<Records<Key, Value>>>,
{
    FetchFn {
        fetch,
        _key: PhantomData,
    }
}

impl<Key, F: Clone> Clone for FetchFn<Key, F> {
    fn clone(&self) -> Self {
        FetchFn {
            fetch: self.fetch.clone(),
            _key: PhantomData,
        }
    }
}

impl<Key, F> Debug for FetchFn<Key, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchFn").field("fetch", &"<closure>").finish()
    }
}

#[async_trait]
impl<Key, Value, F, Fut> Fetcher for FetchFn<Key, F>
where
    Key: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    Value: Clone + Send + Sync + 'static,
    F: Fn(KeySet<Key>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Records<Key, Value>>> + Send + 'static,
{
    type Key = Key;
    type Value = Value;

    async fn fetch(&self, keys: KeySet<Key>) -> Result<Records<Key, Value>> {
        (self.fetch)(keys).await
    }
}

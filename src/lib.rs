//! Graphloader provides the loading layer of a path-addressed graph server,
//! in the style of [JSON Graph](https://netflix.github.io/falcor/documentation/jsongraph.html).
//! A client asks for paths like `titlesById[523,829].name`; a handler for
//! that part of the graph has to look up titles 523 and 829 in some backend,
//! and then describe what it found as a set of values keyed by path.
//!
//! Graphloader covers the pieces in between:
//!
//! - A [`Coalescer`] merges lookups that happen at about the same time into
//!   a single backend call, and hands each caller back exactly the keys it
//!   asked for.
//! - A [`CacheThrough`] remembers every record it has seen, and only asks
//!   its backend for keys it doesn't know yet.
//! - The [`resolve`] functions turn fetched records into [`PathValue`]s,
//!   taking care to say something about every requested path: a missing
//!   entity is a null atom, a failed one is an error, and an entity that
//!   points at another is a reference.
//!
//! ## Fetchers
//!
//! Everything starts with a [`Fetcher`]: an asynchronous bulk lookup that
//! takes a [`KeySet`] and returns one [`Record`] for each key in it. The
//! [`KeySet`] is already deduplicated, and has methods to pair the backend's
//! response with the keys, so that the resulting [`ValueSet`] is guaranteed
//! to have precisely the right set of keys. Any async function of the right
//! shape can be turned into a fetcher with [`fetch_fn`]:
//!
//! ```
//! use std::collections::HashMap;
//! use graphloader::{fetch_fn, KeySet, Records, Result};
//!
//! async fn get_names(ids: KeySet<i64>) -> Result<Records<i64, String>> {
//!     // Pretend this is a database query
//!     let table: HashMap<i64, String> = vec![(1, "A".to_owned()), (2, "B".to_owned())]
//!         .into_iter()
//!         .collect();
//!
//!     let found: Vec<(i64, String)> = ids
//!         .keys()
//!         .filter_map(|id| table.get(id).map(|name| (*id, name.clone())))
//!         .collect();
//!
//!     // Ids that weren't in the table become Record::NotFound
//!     Ok(ids.records_from_iter(found))
//! }
//!
//! let fetcher = fetch_fn(get_names);
//! ```
//!
//! A [`Record`] says how the lookup of one key went: `Found`, `NotFound`, or
//! `Error` if just that key failed. A fetcher that fails as a whole returns
//! `Err`, and that error reaches everyone waiting on the fetch.
//!
//! ## Coalescing and caching
//!
//! [`Coalescer`] and [`CacheThrough`] each wrap a fetcher and are fetchers
//! themselves. The usual arrangement, which [`Config::build`] assembles, is
//! a cache in front of a coalescer in front of the backend. Requests for
//! cached keys return immediately; the misses from every request made in the
//! same coalescing [`Window`] go to the backend as one call.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use futures::executor::block_on;
//! use futures::future::join;
//! use graphloader::{fetch_fn, Config, KeySet, Record, Result};
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//!
//! let names = Config::default().build(fetch_fn(move |ids: KeySet<i64>| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     let found: Vec<(i64, String)> =
//!         ids.keys().map(|id| (*id, format!("title {}", id))).collect();
//!     async move { Result::Ok(ids.records_from_iter(found)) }
//! }));
//!
//! // Both requests land in the same batch
//! let (a, b) = block_on(join(names.load_many(vec![1, 2]), names.load_many(vec![2, 3])));
//! assert_eq!(a.unwrap().len(), 2);
//! assert_eq!(b.unwrap().get(&3), Some(&Record::Found("title 3".to_owned())));
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//!
//! // Everything is cached now
//! let c = block_on(names.load(1)).unwrap();
//! assert_eq!(c, Record::Found("title 1".to_owned()));
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Handlers
//!
//! A [`Handler`] serves one part of the graph with `get`, `set` and `call`
//! operations, producing a [`GraphResponse`]: the [`PathValue`]s it
//! resolved, plus any paths whose cached values callers should throw away.
//! Mutations are checked by an [`Authorizer`] before anything else happens.
//! The [`catalog`] module has handlers for a small video catalog that show
//! how the pieces fit together.
//!
//! ## Design notes
//!
//! ### Poll-driven design
//!
//! In keeping with Rust's polling async design, all of the asynchronous work
//! in a [`Coalescer`] is driven through polling [`CoalesceFuture`]. The
//! fetch is not scheduled in any runtime or run in the background; it is
//! driven directly in the foreground by one of the futures waiting on it, so
//! graphloader works with any executor.
//!
//! The polling is designed to be as lazy as possible. Because the fetch only
//! needs to be driven by a single task, a batch tracks and notifies only a
//! single task to drive it forward. The other futures are woken only when
//! data is available, or when the driving future is dropped. When the fetch
//! completes every future is notified, and each one extracts its own keys
//! from the shared result when it is next polled.
//!
//! ### Snapshots
//!
//! The cache in a [`CacheThrough`] is never modified in place. Each fetch's
//! records are published as a new version of the whole map, through an
//! [`arc_swap::ArcSwap`], so a reader sees all of a fetch's records or none
//! of them, and readers never wait on writers.

mod batch;
mod cache;
pub mod catalog;
mod config;
mod data;
mod envelope;
mod error;
mod fetcher;
mod handler;
mod path;
pub mod resolve;
mod value;
mod wakerset;
mod window;

pub use batch::{CoalesceConfig, CoalesceFuture, Coalescer};
pub use cache::{CacheConfig, CacheThrough};
pub use config::Config;
pub use data::{IntoValuesError, KeySet, KeyedEntry, OnDuplicate, Record, Records, ValueSet};
pub use envelope::{GraphEnvelope, GraphResponse, Node};
pub use error::{Error, Result};
pub use fetcher::{fetch_fn, FetchFn, Fetcher};
pub use handler::{authorize, Authorizer, Handler, Identity, RequireUser};
pub use path::{Path, PathKey};
pub use value::{GraphValue, PathValue, Primitive};
pub use window::Window;

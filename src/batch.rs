use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    mem,
    num::NonZeroUsize,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{future::BoxFuture, ready, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    data::{KeySet, Record, Records, ValueSet},
    error::{Error, Result},
    fetcher::Fetcher,
    wakerset::{WaiterId, WakerSet},
    window::{Window, WindowFuture},
};

/// Rules for how a [`Coalescer`] groups requests into batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalesceConfig {
    /// How long a batch accepts new keys before it is sent to the fetcher.
    pub window: Window,

    /// If set, a batch is sent as soon as it holds this many distinct keys,
    /// without waiting for the window. A single request is never split, so a
    /// batch can end up larger than this.
    pub max_keys: Option<NonZeroUsize>,
}

struct AccumulatingState<F: Fetcher> {
    keys: KeySet<F::Key>,
    fetcher: Arc<F>,
    window: WindowFuture,
    wakers: WakerSet,
}

impl<F: Fetcher> Debug for AccumulatingState<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatingState")
            .field("keys", &self.keys)
            .field("fetcher", &"<fetcher>")
            .field("window", &self.window)
            .field("wakers", &self.wakers)
            .finish()
    }
}

// Design notes:
//
// We only need one task to "drive" this future. However, there are two cases
// we need to handle:
// - If a future is dropped, we need to arrange for a different task to
//   continue driving this batch
// - When the batch completes, we need to wake ALL the tasks
struct RunningState<F: Fetcher> {
    fut: BoxFuture<'static, Result<Records<F::Key, F::Value>>>,
    wakers: WakerSet,
}

enum State<F: Fetcher> {
    Accum(AccumulatingState<F>),
    Running(RunningState<F>),
    Done(Result<Records<F::Key, F::Value>>),
}

type SharedState<F> = Arc<Mutex<State<F>>>;

/// Merges concurrent lookups against one [`Fetcher`] into a single call.
///
/// Every [`load_many`](Coalescer::load_many) made while a batch is
/// accumulating adds its keys to that batch. When the batch's window elapses
/// the union of the keys is sent to the fetcher in one call, and each caller
/// receives exactly the keys it asked for. Requests made after a batch is
/// flushed start a new batch, even while the previous fetch is still
/// outstanding.
///
/// Nothing runs in the background: a batch's fetch is driven by the futures
/// waiting on it. If every one of them is dropped, before or after the
/// flush, the batch and its in-flight fetch are dropped too, and a
/// [`CacheThrough`](crate::CacheThrough) above it records nothing. Keep at
/// least one request alive (or spawn it) if the result must land in a cache.
///
/// A `Coalescer` is usually shared by reference (or in an `Arc`) between
/// request handlers; it is itself a [`Fetcher`], so it can be wrapped by a
/// [`CacheThrough`](crate::CacheThrough).
pub struct Coalescer<F: Fetcher> {
    fetcher: Arc<F>,
    config: CoalesceConfig,

    // The batch currently accepting keys. Only a weak handle is held here:
    // the batch is owned by the futures waiting on it.
    pending: Mutex<Weak<Mutex<State<F>>>>,
}

impl<F: Fetcher> Debug for Coalescer<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer")
            .field("fetcher", &"<fetcher>")
            .field("config", &self.config)
            .finish()
    }
}

impl<F: Fetcher + 'static> Coalescer<F> {
    pub fn new(fetcher: F, config: CoalesceConfig) -> Self {
        Self::from_arc(Arc::new(fetcher), config)
    }

    /// Create a coalescer for a fetcher that is also used elsewhere.
    pub fn from_arc(fetcher: Arc<F>, config: CoalesceConfig) -> Self {
        Self {
            fetcher,
            config,
            pending: Mutex::new(Weak::new()),
        }
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.config
    }

    fn at_capacity(&self, len: usize) -> bool {
        matches!(self.config.max_keys, Some(max_keys) if len >= max_keys.get())
    }

    /// Request a set of keys. The returned future resolves to a record for
    /// every distinct key requested, and no others.
    pub fn load_many(&self, keys: impl IntoIterator<Item = F::Key>) -> CoalesceFuture<F> {
        let keys: KeySet<F::Key> = keys.into_iter().collect();

        // Nothing to fetch; don't disturb the pending batch.
        if keys.is_empty() {
            return CoalesceFuture {
                keys,
                waiter: None,
                state: Some(Arc::new(Mutex::new(State::Done(Ok(ValueSet::default()))))),
            };
        }

        let mut pending = self.pending.lock();

        // If there is an existing batch, and it's still accumulating, add our
        // keys to it. Note that at no point do we check the timing; we assume
        // that if the window has closed, a future poll will flush the batch.
        if let Some(state) = pending.upgrade() {
            let mut guard = state.lock();
            let joined = if let State::Accum(ref mut batch) = *guard {
                batch.keys.extend(keys.keys().cloned());

                // If we've hit the key limit, close the window so that the
                // batch is issued immediately, then detach the batch from
                // the coalescer.
                if self.at_capacity(batch.keys.len()) {
                    trace!(keys = batch.keys.len(), "coalesced batch is full");
                    batch.window.close();
                    batch.wakers.wake_driver();
                    *pending = Weak::new();
                }
                true
            } else {
                false
            };
            drop(guard);

            if joined {
                return CoalesceFuture {
                    keys,
                    waiter: None,
                    state: Some(state),
                };
            }
        }

        let mut window = self.config.window.start();
        let full = self.at_capacity(keys.len());
        if full {
            window.close();
        }

        let state = Arc::new(Mutex::new(State::Accum(AccumulatingState {
            keys: keys.keys().cloned().collect(),
            fetcher: self.fetcher.clone(),
            window,
            wakers: WakerSet::default(),
        })));

        *pending = if full {
            Weak::new()
        } else {
            Arc::downgrade(&state)
        };

        CoalesceFuture {
            keys,
            waiter: None,
            state: Some(state),
        }
    }

    /// Request a single key. Like [`load_many`](Coalescer::load_many), the
    /// key joins the pending batch right away, before the returned future is
    /// first polled.
    pub fn load(&self, key: F::Key) -> impl Future<Output = Result<Record<F::Value>>> {
        let fut = self.load_many(Some(key.clone()));

        async move {
            let mut records = fut.await?.into_map();
            Ok(records.remove(&key).unwrap_or(Record::Error(Error::Missing)))
        }
    }
}

#[async_trait]
impl<F: Fetcher + 'static> Fetcher for Coalescer<F> {
    type Key = F::Key;
    type Value = F::Value;

    async fn fetch(&self, keys: KeySet<F::Key>) -> Result<Records<F::Key, F::Value>> {
        self.load_many(keys).await
    }
}

/// A pending request for a set of keys, sharing its fetch with every other
/// request in the same batch. Created by [`Coalescer::load_many`].
// Invariant: while the batch is accumulating, every key of this future is
// present in the batch's key set.
pub struct CoalesceFuture<F: Fetcher> {
    keys: KeySet<F::Key>,
    waiter: Option<WaiterId>,
    state: Option<SharedState<F>>,
}

// The shared state is only ever touched through the Arc; nothing in this
// struct is structurally pinned.
impl<F: Fetcher> Unpin for CoalesceFuture<F> {}

impl<F: Fetcher> Debug for CoalesceFuture<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalesceFuture")
            .field("keys", &self.keys)
            .field("waiter", &self.waiter)
            .field("complete", &self.state.is_none())
            .finish()
    }
}

impl<F: Fetcher + 'static> Future for CoalesceFuture<F> {
    type Output = Result<Records<F::Key, F::Value>>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let unpinned = Pin::into_inner(self);

        let state = unpinned
            .state
            .as_ref()
            .expect("Can't poll a CoalesceFuture after it has completed");

        // Note about this mutex: the lock is only held for the duration of
        // a poll, never across one.
        let mut guard = state.lock();

        if let State::Accum(ref mut batch) = *guard {
            let waiter = batch.wakers.register(unpinned.waiter.take(), ctx.waker());
            unpinned.waiter = Some(waiter);

            // Check the window
            ready!(batch.window.poll_unpin(ctx));

            // Window is complete. Seal the batch and transition to the
            // Running state. Because the batch is no longer accumulating,
            // the next load on the coalescer starts a fresh one.
            let wakers = mem::take(&mut batch.wakers);
            let keys = batch.keys.take();
            let fetcher = batch.fetcher.clone();

            debug!(keys = keys.len(), waiters = wakers.len(), "flushing coalesced batch");

            let fut = async move { fetcher.fetch(keys).await }.boxed();
            *guard = State::Running(RunningState { fut, wakers });
        }

        if let State::Running(ref mut batch) = *guard {
            let waiter = batch.wakers.register(unpinned.waiter.take(), ctx.waker());
            unpinned.waiter = Some(waiter);

            let result = ready!(batch.fut.poll_unpin(ctx));

            if let Err(ref err) = result {
                debug!(error = %err, "coalesced fetch failed");
            }

            // Now that we have a result, signal all the waiting futures to
            // wake up so they can get their results.
            let mut wakers = mem::take(&mut batch.wakers);
            if let Some(waiter) = unpinned.waiter.take() {
                // We're about to grab our result, so we don't need to wake
                // ourself
                wakers.discard(waiter);
            }
            wakers.wake_all();

            *guard = State::Done(result);
        }

        let output = match *guard {
            State::Done(Ok(ref records)) => Ok(records.project(&unpinned.keys, |key| {
                warn!(?key, "fetcher returned no record for a requested key");
                Record::Error(Error::Missing)
            })),
            State::Done(Err(ref err)) => Err(err.clone()),
            _ => unreachable!("CoalesceFuture contained invalid state"),
        };

        drop(guard);
        unpinned.waiter = None;
        unpinned.state = None;
        Poll::Ready(output)
    }
}

impl<F: Fetcher> Drop for CoalesceFuture<F> {
    fn drop(&mut self) {
        // An important thing to remember when dropping a CoalesceFuture:
        // the shared batch is only ever being driven by a single future.
        // Therefore, we have to ensure that another task is awoken to "take
        // over", in case this one was the driver. This is handled by the
        // WakerSet.
        let state = match self.state.take() {
            Some(state) => state,
            None => return,
        };

        let mut guard = state.lock();

        match *guard {
            State::Accum(ref mut batch) => {
                // Withdraw our keys. Keys that other requests in the batch
                // still want stay in the set.
                for key in self.keys.keys() {
                    batch.keys.discard_key(key);
                }

                if let Some(waiter) = self.waiter.take() {
                    batch.wakers.discard_and_wake(waiter);
                }
            }
            State::Running(ref mut batch) => {
                // The key set is frozen (owned by the running fetch), so our
                // keys are fetched regardless; we just stop waiting.
                if let Some(waiter) = self.waiter.take() {
                    batch.wakers.discard_and_wake(waiter);
                }
            }
            State::Done(..) => {}
        }

        drop(guard);
    }
}

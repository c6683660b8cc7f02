use std::{collections::HashMap, num::NonZeroUsize, task::Waker};

/// Identifies one waiting caller inside a [`WakerSet`]. Deliberately not
/// `Clone`: each id belongs to exactly one pending future.
#[derive(Debug, Eq, PartialEq, Hash)]
pub(crate) struct WaiterId(NonZeroUsize);

impl WaiterId {
    fn duplicate(&self) -> WaiterId {
        WaiterId(self.0)
    }
}

/// The wakers of every caller waiting on one shared batch.
///
/// Only one caller needs to drive the batch (poll its window, then its
/// fetch), but every caller must be woken when the result is available. The
/// set tracks a "driver": the caller that most recently polled. A future
/// that goes away while it is the driver hands the job to another waiter,
/// so the batch always has a path forward as long as anyone is waiting on
/// it.
#[derive(Debug)]
pub(crate) struct WakerSet {
    wakers: HashMap<WaiterId, Waker>,
    driver: Option<WaiterId>,

    // Ids are an ever-increasing integer. A WakerSet lives for one batch, so
    // there's no chance of running out of these.
    next_id: NonZeroUsize,
}

impl Default for WakerSet {
    fn default() -> Self {
        Self {
            wakers: HashMap::with_capacity(1),
            driver: None,
            next_id: NonZeroUsize::MIN,
        }
    }
}

impl WakerSet {
    /// Record the waker a caller just polled with, and make that caller the
    /// driver. Pass `None` the first time a caller registers; the returned id
    /// must be passed back on every later poll.
    pub(crate) fn register(&mut self, id: Option<WaiterId>, waker: &Waker) -> WaiterId {
        let id = match id {
            Some(id) => id,
            None => {
                let id = WaiterId(self.next_id);
                self.next_id = self.next_id.saturating_add(1);
                id
            }
        };

        match self.wakers.get_mut(&id) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                self.wakers.insert(id.duplicate(), waker.clone());
            }
        }

        self.driver = Some(id.duplicate());
        id
    }

    /// Forget a caller that has its result and needs no further wakeups.
    pub(crate) fn discard(&mut self, id: WaiterId) {
        self.wakers.remove(&id);
        if self.driver.as_ref() == Some(&id) {
            self.driver = None;
        }
    }

    /// Forget a caller that lost interest. If it was driving the batch (or
    /// nobody was), another waiter is promoted to driver and woken so that it
    /// can continue the work.
    pub(crate) fn discard_and_wake(&mut self, id: WaiterId) {
        self.wakers.remove(&id);
        if self.driver.is_none() || self.driver.as_ref() == Some(&id) {
            self.driver = None;
            if let Some((next, waker)) = self.wakers.iter().next() {
                self.driver = Some(next.duplicate());
                waker.wake_by_ref();
            }
        }
    }

    /// Wake the current driver, so that it re-polls the batch. Used when the
    /// batch's window is closed early.
    pub(crate) fn wake_driver(&self) {
        if let Some(waker) = self.driver.as_ref().and_then(|id| self.wakers.get(id)) {
            waker.wake_by_ref();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.wakers.len()
    }

    pub(crate) fn wake_all(self) {
        self.wakers.into_iter().for_each(|(_id, waker)| waker.wake());
    }
}

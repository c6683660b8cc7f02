//! Coalescing windows: how long a batch keeps accepting keys before it is
//! flushed to the fetcher.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures_timer::Delay;
use serde::{Deserialize, Serialize};

/// The window during which a batch accumulates keys.
///
/// The window starts when the batch is created and is driven by polling the
/// batch's futures, so it only ever elapses when some task is waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Flush once the task driving the batch has yielded to the executor a
    /// single time. Every request made before the executor gets back to that
    /// task joins the batch; the latency cost is one scheduler turn.
    NextTick,

    /// Flush after a fixed delay. Serialized as a number of milliseconds.
    Delay(#[serde(with = "millis")] Duration),
}

impl Default for Window {
    fn default() -> Self {
        Window::NextTick
    }
}

impl Window {
    pub(crate) fn start(&self) -> WindowFuture {
        match *self {
            Window::NextTick => WindowFuture::Yield { yielded: false },
            Window::Delay(duration) if duration == Duration::from_secs(0) => WindowFuture::Elapsed,
            Window::Delay(duration) => WindowFuture::Timer(Delay::new(duration)),
        }
    }
}

#[derive(Debug)]
pub(crate) enum WindowFuture {
    Yield { yielded: bool },
    Timer(Delay),
    Elapsed,
}

impl WindowFuture {
    /// End the window early, so that the next poll flushes the batch.
    pub(crate) fn close(&mut self) {
        *self = WindowFuture::Elapsed;
    }
}

impl Future for WindowFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        match this {
            WindowFuture::Yield { yielded: true } | WindowFuture::Elapsed => Poll::Ready(()),
            WindowFuture::Yield { yielded } => {
                *yielded = true;
                ctx.waker().wake_by_ref();
                Poll::Pending
            }
            WindowFuture::Timer(delay) => {
                futures::ready!(delay.poll_unpin(ctx));
                this.close();
                Poll::Ready(())
            }
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

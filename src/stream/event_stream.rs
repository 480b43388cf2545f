//! Channel-backed event stream with single-shot cleanup.
//!
//! ```text
//! producer ─► Controller ─► bounded mpsc ─► EventStream (consumer)
//!               │ close / error                 │ cancel / drop
//!               └──────────► Shared ◄───────────┘
//!                     finished flag + cleanup slot
//! ```
//!
//! The setup closure runs on the first poll and returns the cleanup closure.
//! Whichever terminal transition comes first (close, error, or consumer
//! cancellation) runs cleanup; later ones are no-ops.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{EnqueueError, StreamClosed, StreamError};
use crate::config::DEFAULT_STREAM_CAPACITY;

/// Cleanup callback returned by a stream's setup closure.
pub type Cleanup = Box<dyn FnOnce() + Send + 'static>;

type Setup<T> = Box<dyn FnOnce(Controller<T>) -> Cleanup + Send + 'static>;

/// Type-erased stream of JSON values, as carried by a procedure outcome.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<Value, StreamError>> + Send + 'static>>;

enum Terminal {
    Closed,
    Errored(StreamError),
    Cancelled,
}

enum CleanupSlot {
    Pending,
    Installed(Cleanup),
    Done,
}

struct Shared {
    finished: AtomicBool,
    terminal: Mutex<Option<Terminal>>,
    cleanup: Mutex<CleanupSlot>,
    waker: AtomicWaker,
}

impl Shared {
    fn new() -> Self {
        Self {
            finished: AtomicBool::new(false),
            terminal: Mutex::new(None),
            cleanup: Mutex::new(CleanupSlot::Pending),
            waker: AtomicWaker::new(),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Record the first terminal transition. Returns false if already finished.
    fn finish(&self, terminal: Terminal) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.terminal.lock() = Some(terminal);
        self.waker.wake();
        self.run_cleanup();
        true
    }

    fn run_cleanup(&self) {
        let slot = std::mem::replace(&mut *self.cleanup.lock(), CleanupSlot::Done);
        if let CleanupSlot::Installed(cleanup) = slot {
            cleanup();
        }
    }

    /// Store the cleanup returned by setup, or run it right away when the
    /// stream already finished during setup.
    fn install_cleanup(&self, cleanup: Cleanup) {
        let mut slot = self.cleanup.lock();
        match *slot {
            CleanupSlot::Pending => *slot = CleanupSlot::Installed(cleanup),
            _ => {
                drop(slot);
                cleanup();
            }
        }
    }

    fn take_terminal(&self) -> Option<Terminal> {
        self.terminal.lock().take()
    }
}

/// Producer handle passed to the setup closure.
///
/// Cheap to clone; every clone feeds the same stream.
pub struct Controller<T> {
    sender: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for Controller<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Controller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("closed", &self.shared.is_finished())
            .finish()
    }
}

impl<T: Send + 'static> Controller<T> {
    /// Deliver one value, waiting while the consumer's buffer is full.
    pub async fn enqueue(&self, value: T) -> Result<(), StreamClosed> {
        if self.shared.is_finished() {
            return Err(StreamClosed);
        }
        self.sender.send(value).await.map_err(|_| StreamClosed)
    }

    /// Deliver one value without waiting.
    pub fn try_enqueue(&self, value: T) -> Result<(), EnqueueError> {
        if self.shared.is_finished() {
            return Err(EnqueueError::Closed);
        }
        self.sender.try_send(value).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// End the stream normally. Already-queued values are still delivered.
    pub fn close(&self) {
        self.shared.finish(Terminal::Closed);
    }

    /// End the stream with an error, delivered after already-queued values.
    pub fn error(&self, err: impl Into<StreamError>) {
        self.shared.finish(Terminal::Errored(err.into()));
    }

    /// Whether the stream reached a terminal state (including cancellation).
    pub fn is_closed(&self) -> bool {
        self.shared.is_finished()
    }
}

/// Lazily started, cancellable, single-consumer stream.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use seamless_rpc::stream::EventStream;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut stream = EventStream::new(|controller| {
///     tokio::spawn(async move {
///         controller.enqueue("hello").await.ok();
///         controller.enqueue("world").await.ok();
///         controller.close();
///     });
///     || {}
/// });
///
/// assert_eq!(stream.next().await, Some(Ok("hello")));
/// assert_eq!(stream.next().await, Some(Ok("world")));
/// assert_eq!(stream.next().await, None);
/// # }
/// ```
pub struct EventStream<T> {
    receiver: mpsc::Receiver<T>,
    shared: Arc<Shared>,
    setup: Option<(Setup<T>, Controller<T>)>,
    started: bool,
    done: bool,
}

impl<T: Send + 'static> EventStream<T> {
    /// Create a stream with the default buffer capacity.
    ///
    /// `setup` runs on the first poll. For a procedure's reply that is when
    /// the response body is written, after the request scope has ended, so
    /// [`use_context`](crate::server::use_context) is not available inside
    /// it. Read what the producer needs from the context before building the
    /// stream.
    pub fn new<S, C>(setup: S) -> Self
    where
        S: FnOnce(Controller<T>) -> C + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY, setup)
    }

    /// Create a stream buffering at most `capacity` undelivered values.
    pub fn with_capacity<S, C>(capacity: usize, setup: S) -> Self
    where
        S: FnOnce(Controller<T>) -> C + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(Shared::new());
        let controller = Controller {
            sender,
            shared: shared.clone(),
        };
        let setup: Setup<T> =
            Box::new(move |controller: Controller<T>| -> Cleanup { Box::new(setup(controller)) });

        Self {
            receiver,
            shared,
            setup: Some((setup, controller)),
            started: false,
            done: false,
        }
    }

    /// Stop consuming. Runs the producer's cleanup if it has not run yet.
    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    /// Whether setup has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Erase the item type into JSON values.
    pub fn into_value_stream(self) -> ValueStream
    where
        T: Serialize,
    {
        Box::pin(self.map(|item| {
            item.and_then(|value| {
                serde_json::to_value(value).map_err(|err| StreamError::new(err.to_string()))
            })
        }))
    }

    fn start(&mut self) {
        if let Some((setup, controller)) = self.setup.take() {
            self.started = true;
            let cleanup = setup(controller);
            self.shared.install_cleanup(cleanup);
        }
    }

    fn cancel_in_place(&mut self) {
        if self.started && self.shared.finish(Terminal::Cancelled) {
            tracing::debug!("Event stream cancelled by consumer");
        }
        self.done = true;
        self.receiver.close();
    }
}

impl<T: Send + 'static> Stream for EventStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        this.start();

        this.shared.waker.register(cx.waker());
        // Read the flag before draining so values queued ahead of the
        // terminal transition are always delivered first.
        let finished = this.shared.is_finished();

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(value)) => return Poll::Ready(Some(Ok(value))),
            Poll::Ready(None) => {
                // Every controller was dropped without a terminal call.
                this.shared.finish(Terminal::Closed);
                this.done = true;
            }
            Poll::Pending if !finished => return Poll::Pending,
            Poll::Pending => this.done = true,
        }

        match this.shared.take_terminal() {
            Some(Terminal::Errored(err)) => Poll::Ready(Some(Err(err))),
            Some(Terminal::Closed) | Some(Terminal::Cancelled) | None => Poll::Ready(None),
        }
    }
}

impl<T> Unpin for EventStream<T> {}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        if self.started && self.shared.finish(Terminal::Cancelled) {
            tracing::debug!("Event stream dropped before completion");
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("started", &self.started)
            .field("finished", &self.shared.is_finished())
            .finish()
    }
}

/// Shorthand for [`EventStream::new`].
pub fn event_stream<T, S, C>(setup: S) -> EventStream<T>
where
    T: Send + 'static,
    S: FnOnce(Controller<T>) -> C + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    EventStream::new(setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_enqueue_then_close() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller| {
            tokio::spawn(async move {
                controller.enqueue("hello").await.unwrap();
                controller.enqueue("world").await.unwrap();
                controller.close();
            });
            cleanup
        });

        assert_eq!(stream.next().await, Some(Ok("hello")));
        assert_eq!(stream.next().await, Some(Ok("world")));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        drop(stream);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_is_delivered_after_queued_values() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller| {
            controller.try_enqueue(1).unwrap();
            controller.error("boom");
            cleanup
        });

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(stream.next().await, Some(Err(StreamError::new("boom"))));
        assert_eq!(stream.next().await, None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_is_lazy() {
        let (cleanups, cleanup) = counter();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let stream: EventStream<u32> = EventStream::new(move |_controller| {
            flag.store(true, Ordering::SeqCst);
            cleanup
        });

        assert!(!stream.is_started());
        drop(stream);

        assert!(!started.load(Ordering::SeqCst));
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_runs_cleanup_once() {
        let (cleanups, cleanup) = counter();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let mut stream = EventStream::new(move |controller: Controller<u32>| {
            tx.send(controller).ok();
            cleanup
        });

        // Start the stream; nothing is queued yet.
        let pending = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());

        let controller = rx.await.unwrap();
        stream.cancel();
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        // Close racing after the cancel is suppressed.
        controller.close();
        assert!(controller.is_closed());
        assert_eq!(controller.enqueue(1).await, Err(StreamClosed));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_after_start_runs_cleanup() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller: Controller<u32>| {
            controller.try_enqueue(7).unwrap();
            cleanup
        });

        assert_eq!(stream.next().await, Some(Ok(7)));
        drop(stream);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_inside_setup() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller| {
            controller.try_enqueue("only").unwrap();
            controller.close();
            cleanup
        });

        assert_eq!(stream.next().await, Some(Ok("only")));
        assert_eq!(stream.next().await, None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_double_close_and_error_are_noops() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller: Controller<u32>| {
            controller.close();
            controller.close();
            controller.error("late");
            cleanup
        });

        assert_eq!(stream.next().await, None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backpressure_with_try_enqueue() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut stream = EventStream::with_capacity(2, move |controller: Controller<u32>| {
            tx.send(controller).ok();
            || {}
        });

        let pending = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        assert!(pending.is_err());
        let controller = rx.await.unwrap();

        assert_eq!(controller.try_enqueue(1), Ok(()));
        assert_eq!(controller.try_enqueue(2), Ok(()));
        assert_eq!(controller.try_enqueue(3), Err(EnqueueError::Full));

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(controller.try_enqueue(3), Ok(()));
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_consumer() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut stream = EventStream::with_capacity(1, move |controller: Controller<u32>| {
            tx.send(controller).ok();
            || {}
        });

        let _ = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        let controller = rx.await.unwrap();

        controller.enqueue(1).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(20), controller.enqueue(2)).await;
        assert!(blocked.is_err(), "enqueue must wait while the buffer is full");

        assert_eq!(stream.next().await, Some(Ok(1)));
        controller.enqueue(2).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(2)));
    }

    #[tokio::test]
    async fn test_dropped_controllers_end_stream() {
        let (cleanups, cleanup) = counter();
        let mut stream = EventStream::new(move |controller: Controller<u32>| {
            drop(controller);
            cleanup
        });

        assert_eq!(stream.next().await, None);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_value_stream() {
        #[derive(Serialize)]
        struct Message {
            text: &'static str,
        }

        let mut values = EventStream::new(|controller| {
            controller.try_enqueue(Message { text: "hi" }).unwrap();
            controller.close();
            || {}
        })
        .into_value_stream();

        assert_eq!(
            values.next().await,
            Some(Ok(serde_json::json!({"text": "hi"})))
        );
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_many_streams_do_not_block_each_other() {
        let mut streams: Vec<EventStream<usize>> = (0..50)
            .map(|i| {
                EventStream::with_capacity(1, move |controller| {
                    tokio::spawn(async move {
                        controller.enqueue(i).await.ok();
                        controller.close();
                    });
                    || {}
                })
            })
            .collect();

        for (i, stream) in streams.iter_mut().enumerate().rev() {
            assert_eq!(stream.next().await, Some(Ok(i)));
            assert_eq!(stream.next().await, None);
        }
    }
}

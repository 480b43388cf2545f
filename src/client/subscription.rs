//! Callback-driven consumer of an [`RpcStream`].
//!
//! A subscription is idle, subscribing (waiting for the call that opens the
//! stream) or subscribed (a reader task is delivering values). The reader
//! calls `on_close` when the stream ends or is cancelled, and `on_error` when
//! it fails; either way the subscription is idle again afterwards.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::RpcStream;
use crate::error::{Error, Result};

type DataCallback<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(Error) + Send + Sync>;
type CloseCallback = Arc<dyn Fn() + Send + Sync>;

enum Phase {
    Idle,
    Subscribing,
    Subscribed {
        generation: u64,
        token: CancellationToken,
        reader: JoinHandle<()>,
    },
}

/// Puts a pending `subscribe` back to idle when its future is dropped early.
struct PendingSubscribe<'a> {
    phase: &'a Mutex<Phase>,
    armed: bool,
}

impl PendingSubscribe<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSubscribe<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut phase = self.phase.lock();
        if matches!(*phase, Phase::Subscribing) {
            *phase = Phase::Idle;
        }
    }
}

/// Delivers the values of one stream at a time to callbacks.
///
/// ```no_run
/// # use seamless_rpc::client::{RpcClient, RpcStream, Subscription};
/// # async fn run(client: RpcClient) -> seamless_rpc::Result<()> {
/// let messages = Subscription::new(|message: String| println!("{message}"))
///     .on_close(|| println!("closed"));
///
/// messages
///     .subscribe(client.rpc("components/chat_server/messages").invoke::<RpcStream<String>>(vec![]))
///     .await?;
///
/// // later
/// messages.unsubscribe().await;
/// # Ok(())
/// # }
/// ```
pub struct Subscription<T> {
    on_data: DataCallback<T>,
    on_error: ErrorCallback,
    on_close: Option<CloseCallback>,
    phase: Arc<Mutex<Phase>>,
    generation: AtomicU64,
}

impl<T: Send + 'static> Subscription<T> {
    /// Create an idle subscription delivering values to `on_data`.
    pub fn new<F>(on_data: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            on_data: Arc::new(on_data),
            on_error: Arc::new(|err| error!(error = %err, "Subscription failed")),
            on_close: None,
            phase: Arc::new(Mutex::new(Phase::Idle)),
            generation: AtomicU64::new(0),
        }
    }

    /// Called once when the stream ends or is cancelled.
    pub fn on_close<F>(mut self, on_close: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(on_close));
        self
    }

    /// Called once when the stream fails. Defaults to logging the error.
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(on_error);
        self
    }

    /// Whether the call opening the stream is still pending.
    pub fn is_subscribing(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Subscribing)
    }

    /// Whether a reader is delivering values.
    pub fn is_subscribed(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Subscribed { .. })
    }

    /// Await `source` and start delivering its values.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadySubscribing`] while a previous `subscribe` is pending
    /// - [`Error::AlreadySubscribed`] while a reader is active
    /// - whatever `source` fails with; the subscription is idle again
    ///
    /// Dropping the returned future before it completes also leaves the
    /// subscription idle.
    pub async fn subscribe<S>(&self, source: S) -> Result<()>
    where
        S: Future<Output = Result<RpcStream<T>>>,
    {
        {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Subscribing => return Err(Error::AlreadySubscribing),
                Phase::Subscribed { .. } => return Err(Error::AlreadySubscribed),
                Phase::Idle => *phase = Phase::Subscribing,
            }
        }
        let pending = PendingSubscribe {
            phase: &self.phase,
            armed: true,
        };

        let stream = source.await?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        // Held across spawn so the reader cannot finish before it is recorded.
        let mut phase = self.phase.lock();
        let reader = tokio::spawn(read(
            stream,
            token.clone(),
            self.on_data.clone(),
            self.on_error.clone(),
            self.on_close.clone(),
            self.phase.clone(),
            generation,
        ));
        *phase = Phase::Subscribed {
            generation,
            token,
            reader,
        };
        drop(phase);
        pending.disarm();

        Ok(())
    }

    /// Cancel the stream and wait for the reader to finish.
    pub async fn unsubscribe(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Idle);
        match previous {
            Phase::Subscribed { token, reader, .. } => {
                token.cancel();
                if let Err(err) = reader.await {
                    error!(error = %err, "Subscription reader failed");
                }
            }
            other => *self.phase.lock() = other,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Phase::Subscribed { token, .. } = &*self.phase.lock() {
            token.cancel();
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match *self.phase.lock() {
            Phase::Idle => "idle",
            Phase::Subscribing => "subscribing",
            Phase::Subscribed { .. } => "subscribed",
        };
        f.debug_struct("Subscription").field("phase", &phase).finish()
    }
}

async fn read<T: Send + 'static>(
    mut stream: RpcStream<T>,
    token: CancellationToken,
    on_data: DataCallback<T>,
    on_error: ErrorCallback,
    on_close: Option<CloseCallback>,
    phase: Arc<Mutex<Phase>>,
    generation: u64,
) {
    let failure = loop {
        let item = tokio::select! {
            _ = token.cancelled() => break None,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(value)) => on_data(value),
            Some(Err(err)) => break Some(err),
            None => break None,
        }
    };
    stream.cancel();

    match failure {
        Some(err) => on_error(Error::Stream(err)),
        None => {
            if let Some(on_close) = &on_close {
                on_close();
            }
        }
    }

    let mut phase = phase.lock();
    if matches!(*phase, Phase::Subscribed { generation: current, .. } if current == generation) {
        *phase = Phase::Idle;
    }
}

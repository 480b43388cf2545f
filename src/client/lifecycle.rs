//! Abort hooks for open streams.
//!
//! Every open [`RpcStream`](super::RpcStream) registers its cancellation
//! token here and removes it when it ends, so shutting the client down aborts
//! exactly the requests still running and nothing accumulates across
//! repeated open/close cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry of abort hooks, keyed by registration id.
#[derive(Debug, Default)]
pub struct Lifecycle {
    next_id: AtomicU64,
    hooks: Mutex<HashMap<u64, CancellationToken>>,
}

impl Lifecycle {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token`; returns the id to deregister it with.
    pub fn register(&self, token: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().insert(id, token);
        id
    }

    /// Remove a hook. Returns false if it was already gone.
    pub fn deregister(&self, id: u64) -> bool {
        self.hooks.lock().remove(&id).is_some()
    }

    /// Cancel and remove every hook. Returns how many were cancelled.
    pub fn abort_all(&self) -> usize {
        let hooks: Vec<_> = self.hooks.lock().drain().map(|(_, token)| token).collect();
        for token in &hooks {
            token.cancel();
        }
        if !hooks.is_empty() {
            debug!(count = hooks.len(), "Aborted open streams");
        }
        hooks.len()
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }
}

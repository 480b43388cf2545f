//! Per-request execution context.
//!
//! A scope is a task-local map opened with [`run_with_scope`]. Values stored
//! under a [`StateKey`] are visible to every `.await` point of the scoped
//! future and nowhere else: concurrent scopes never see each other's values,
//! and tasks started with `tokio::spawn` do not inherit the scope.
//!
//! # Example
//!
//! ```
//! use seamless_rpc::state::{define_state, run_with_scope};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let user = define_state::<String>();
//!
//! let seen = run_with_scope(async move {
//!     user.create_state("ada".to_string()).unwrap();
//!     user.use_state().unwrap()
//! })
//! .await
//! .unwrap();
//!
//! assert_eq!(seen.as_deref(), Some("ada"));
//! assert!(user.use_state().is_err()); // outside any scope
//! # }
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

type Store = RefCell<HashMap<u64, Box<dyn Any + Send>>>;

tokio::task_local! {
    static STORE: Store;
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Misuse of the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// [`run_with_scope`] called inside an active scope.
    #[error("Store has already been created.")]
    ScopeAlreadyActive,
    /// State accessed outside any scope.
    #[error("Store has not been created.")]
    NoActiveScope,
    /// [`StateKey::create_state`] called twice in one scope.
    #[error("State has already been created.")]
    AlreadyCreated,
    /// [`StateKey::use_state_or_err`] called before the value was created.
    #[error("State has not been created.")]
    NotCreated,
}

/// Run `fut` inside a fresh, empty scope.
///
/// Scopes do not nest.
pub async fn run_with_scope<F>(fut: F) -> Result<F::Output, StateError>
where
    F: Future,
{
    if in_scope() {
        return Err(StateError::ScopeAlreadyActive);
    }
    Ok(STORE.scope(RefCell::new(HashMap::new()), fut).await)
}

/// Whether the current task runs inside a scope.
pub fn in_scope() -> bool {
    STORE.try_with(|_| ()).is_ok()
}

/// Allocate a new private key for values of type `T`.
pub fn define_state<T>() -> StateKey<T>
where
    T: Clone + Send + 'static,
{
    StateKey {
        id: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
        _phantom: PhantomData,
    }
}

/// Typed handle to one slot of the current scope.
pub struct StateKey<T> {
    id: u64,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateKey").field("id", &self.id).finish()
    }
}

impl<T> StateKey<T>
where
    T: Clone + Send + 'static,
{
    fn with_store<R>(
        &self,
        f: impl FnOnce(&mut HashMap<u64, Box<dyn Any + Send>>) -> R,
    ) -> Result<R, StateError> {
        STORE
            .try_with(|store| f(&mut store.borrow_mut()))
            .map_err(|_| StateError::NoActiveScope)
    }

    /// Store the value for this scope. Fails if one already exists.
    pub fn create_state(&self, value: T) -> Result<(), StateError> {
        self.with_store(|store| match store.entry(self.id) {
            Entry::Occupied(_) => Err(StateError::AlreadyCreated),
            Entry::Vacant(slot) => {
                slot.insert(Box::new(value));
                Ok(())
            }
        })?
    }

    /// Store the value, overwriting any previous one.
    pub fn replace_state(&self, value: T) -> Result<(), StateError> {
        self.with_store(|store| {
            store.insert(self.id, Box::new(value));
        })
    }

    /// Remove the value from this scope.
    pub fn clear_state(&self) -> Result<(), StateError> {
        self.with_store(|store| {
            store.remove(&self.id);
        })
    }

    /// The value for this scope, if created.
    pub fn use_state(&self) -> Result<Option<T>, StateError> {
        self.with_store(|store| {
            store
                .get(&self.id)
                .and_then(|value| (**value).downcast_ref::<T>())
                .cloned()
        })
    }

    /// The value for this scope; missing values are an error.
    pub fn use_state_or_err(&self) -> Result<T, StateError> {
        self.use_state()?.ok_or(StateError::NotCreated)
    }
}

//! Procedure module - registration, ids and dispatch.
//!
//! Provides:
//! - [`Registry`] - maps procedure ids (plain and hashed) to procedures
//! - [`Handler`] / [`TypedHandler`] - async functions behind one object-safe trait
//! - [`ProcedureDef`] - compile-time definitions collected by [`procedure!`](crate::procedure!)
//! - [`RpcError`] / [`ProcedureError`] - what a procedure can fail with
//!
//! # Example
//!
//! ```ignore
//! // src/components/chat_server.rs
//! use seamless_rpc::procedure;
//! use seamless_rpc::procedure::RpcError;
//!
//! pub async fn login(username: String) -> Result<String, RpcError> {
//!     if username.is_empty() {
//!         return Err(RpcError::Unauthorized);
//!     }
//!     Ok(username)
//! }
//!
//! procedure!(login);
//!
//! // Anywhere in the server:
//! let registry = Registry::discover(&RegistryOptions::default())?;
//! assert!(registry.contains("components/chat_server/login"));
//! ```

mod error;
mod handler;
pub mod id;
mod registry;
mod source;

pub use error::{ProcedureError, RpcError};
pub use handler::{
    BoxFuture, Handler, IntoOutcome, Outcome, ProcedureFn, ProcedureResult, TypedHandler,
};
pub use registry::{Procedure, Registry, RegistryBuilder};
pub use source::{ProcedureDef, SourceFilter};

//! # seamless-rpc
//!
//! Transparent RPC between a Rust HTTP server and its clients.
//!
//! Async functions in files matching the registry's include patterns (by
//! default `**/*_server.rs` under `src`) become procedures. Clients call them
//! by id with positional JSON arguments; procedures answer with a value,
//! nothing, or a stream of values delivered as Server-Sent Events.
//!
//! ## Architecture
//!
//! - **Registry**: compile-time procedure definitions filtered by source path,
//!   addressed by a plain id (`components/chat_server/login`) and a hashed id
//! - **Server**: axum router, one `POST <base>/<id>` route, per-request
//!   execution context and error mapping
//! - **Client**: reqwest-based caller with event-stream decoding and
//!   cancellation on drop or shutdown
//!
//! ## Example
//!
//! ```ignore
//! // src/components/chat_server.rs
//! use seamless_rpc::stream::{event_stream, EventStream};
//!
//! pub async fn login(username: String) -> String {
//!     format!("Welcome, {username}")
//! }
//!
//! pub async fn messages() -> EventStream<String> {
//!     event_stream(|controller| {
//!         controller.try_enqueue("hello".to_string()).ok();
//!         controller.close();
//!         || {}
//!     })
//! }
//!
//! seamless_rpc::procedure!(login, messages);
//!
//! // src/main.rs
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = seamless_rpc::RpcServer::builder().build()?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod procedure;
pub mod protocol;
pub mod server;
pub mod state;
pub mod stream;

mod macros;

pub use client::RpcClient;
pub use codec::Json;
pub use error::{Error, Result};
pub use procedure::{ProcedureError, Registry, RpcError};
pub use server::RpcServer;
pub use stream::EventStream;

#[doc(hidden)]
pub use inventory;
#[doc(hidden)]
pub use serde_json;

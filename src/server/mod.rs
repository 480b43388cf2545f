//! Server transport - procedures over HTTP with axum.
//!
//! Each request runs through the same steps:
//!
//! ```text
//! POST <base>/<id>, body = JSON array
//!   │
//!   ├─ open execution scope
//!   ├─ parse arguments          (InvalidRequestBody unless a JSON array)
//!   ├─ bind RequestContext, run on_request hook (may fail like a procedure)
//!   ├─ resolve + invoke         (ProcedureNotFound on miss)
//!   └─ respond: () → 204 | value → 200 JSON | EventStream → SSE
//!
//! failure → on_error hook, else RpcError → status + JSON payload,
//!           else log + bare 500
//! ```
//!
//! # Example
//!
//! ```no_run
//! use seamless_rpc::server::RpcServer;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let server = RpcServer::builder().root_dir("src").build()?;
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! server.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

mod context;
mod response;

pub use context::{try_use_context, use_context, RequestContext};
pub use response::{error_response, http_status, internal_error};

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use tracing::{debug, error, warn};

use crate::codec::JsonCodec;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::procedure::{BoxFuture, ProcedureError, ProcedureResult, Registry, RpcError};
use crate::state::run_with_scope;
use context::bind_context;
use response::outcome_response;

type HookResult<T> = std::result::Result<T, ProcedureError>;

/// Hook run before every procedure.
pub type RequestHook =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, HookResult<()>> + Send + Sync>;

/// Hook that turns any failure into a response.
pub type ErrorHook = Arc<
    dyn Fn(RequestContext, ProcedureError) -> BoxFuture<'static, HookResult<Response>>
        + Send
        + Sync,
>;

/// Builder for [`RpcServer`].
pub struct RpcServerBuilder {
    config: ServerConfig,
    registry: Option<Registry>,
    on_request: Option<RequestHook>,
    on_error: Option<ErrorHook>,
}

impl RpcServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: None,
            on_request: None,
            on_error: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory procedure source paths are resolved against.
    pub fn root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.config.registry.root_dir = root_dir.into();
        self
    }

    /// Replace the include patterns.
    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.registry.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the exclude patterns.
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.registry.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Serve an explicit registry instead of discovering one.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Route prefix (default `/rpc`).
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.config.base_path = base_path.into();
        self
    }

    /// Largest accepted request body, in bytes.
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.max_body_size = max_body_size;
        self
    }

    /// Run `hook` inside the request scope before every procedure.
    pub fn on_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<()>> + Send + 'static,
    {
        self.on_request = Some(Arc::new(move |ctx| -> BoxFuture<'static, HookResult<()>> {
            Box::pin(hook(ctx))
        }));
        self
    }

    /// Let `hook` answer every failed request.
    ///
    /// If the hook itself fails, both errors are logged and the response is
    /// a bare 500.
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RequestContext, ProcedureError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HookResult<Response>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(
            move |ctx, err| -> BoxFuture<'static, HookResult<Response>> {
                Box::pin(hook(ctx, err))
            },
        ));
        self
    }

    /// Build the server, discovering procedures unless a registry was given.
    ///
    /// # Errors
    ///
    /// Fails on invalid glob patterns, invalid export names, or duplicate ids.
    pub fn build(self) -> Result<RpcServer> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => Registry::discover(&self.config.registry)?,
        };

        Ok(RpcServer {
            inner: Arc::new(Inner {
                base_path: self.config.normalized_base_path(),
                max_body_size: self.config.max_body_size,
                registry,
                on_request: self.on_request,
                on_error: self.on_error,
            }),
        })
    }
}

struct Inner {
    base_path: String,
    max_body_size: usize,
    registry: Registry,
    on_request: Option<RequestHook>,
    on_error: Option<ErrorHook>,
}

/// HTTP binding of a procedure registry.
///
/// Cheap to clone; clones share the registry and hooks.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<Inner>,
}

impl RpcServer {
    /// Start building a server.
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    /// The served registry.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Normalized route prefix.
    pub fn base_path(&self) -> &str {
        &self.inner.base_path
    }

    /// Router mounting `POST <base_path>/{*procedure_id}`.
    pub fn router(&self) -> Router {
        let route = format!("{}/{{*procedure_id}}", self.inner.base_path);
        Router::new()
            .route(&route, post(serve_procedure))
            .with_state(self.clone())
    }

    /// Serve on `listener` until the process ends.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let router = self.router();
        axum::serve(listener, router).await
    }

    /// Handle one request addressed to `procedure_id`.
    ///
    /// Usable directly when mounting procedures in a router of your own.
    pub async fn handle(&self, procedure_id: &str, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let ctx = RequestContext::new(procedure_id, &parts);

        let mut response = match run_with_scope(self.dispatch(ctx.clone(), body)).await {
            Ok(response) => response,
            Err(err) => {
                error!(procedure_id, error = %err, "Request scope could not be opened");
                internal_error()
            }
        };

        for (name, value) in ctx.response_headers().iter() {
            response.headers_mut().append(name, value.clone());
        }
        response
    }

    async fn dispatch(&self, ctx: RequestContext, body: Body) -> Response {
        match self.execute(&ctx, body).await {
            Ok(outcome) => outcome_response(outcome, ctx.procedure_id()),
            Err(err) => self.respond_error(ctx, err).await,
        }
    }

    async fn execute(&self, ctx: &RequestContext, body: Body) -> ProcedureResult {
        let bytes = match axum::body::to_bytes(body, self.inner.max_body_size).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    procedure_id = ctx.procedure_id(),
                    limit = self.inner.max_body_size,
                    error = %err,
                    "Request body could not be read"
                );
                return Err(RpcError::InvalidRequestBody.into());
            }
        };
        let args = JsonCodec::decode_args(&bytes)?;

        bind_context(ctx.clone())?;

        if let Some(hook) = &self.inner.on_request {
            hook(ctx.clone()).await?;
        }

        debug!(procedure_id = ctx.procedure_id(), args = args.len(), "Invoking procedure");
        self.inner.registry.call(ctx.procedure_id(), args).await
    }

    async fn respond_error(&self, ctx: RequestContext, err: ProcedureError) -> Response {
        let procedure_id = ctx.procedure_id().to_string();

        if let Some(hook) = &self.inner.on_error {
            let message = err.to_string();
            return match hook(ctx, err).await {
                Ok(response) => response,
                Err(hook_err) => {
                    error!(
                        %procedure_id,
                        error = %message,
                        hook_error = %hook_err,
                        "Error hook failed"
                    );
                    internal_error()
                }
            };
        }

        match err {
            ProcedureError::Rpc(err) => error_response(&err),
            ProcedureError::Internal(err) => {
                error!(%procedure_id, error = ?err, "Procedure failed");
                internal_error()
            }
        }
    }
}

async fn serve_procedure(
    State(server): State<RpcServer>,
    Path(procedure_id): Path<String>,
    request: Request,
) -> Response {
    server.handle(&procedure_id, request).await
}

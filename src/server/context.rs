//! Request context for procedures.
//!
//! The server binds one [`RequestContext`] per request into the execution
//! scope before any hook or procedure runs. Procedures read it back with
//! [`use_context`] at any depth of their call tree, without threading it
//! through arguments.
//!
//! # Example
//!
//! ```ignore
//! use seamless_rpc::server::use_context;
//!
//! pub async fn whoami() -> Result<Option<String>, ProcedureError> {
//!     let ctx = use_context()?;
//!     Ok(ctx.cookie("session"))
//! }
//! ```

use std::fmt;
use std::sync::{Arc, LazyLock};

use axum::http::header::{InvalidHeaderValue, COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use parking_lot::Mutex;

use crate::state::{define_state, StateError, StateKey};

static CONTEXT: LazyLock<StateKey<RequestContext>> =
    LazyLock::new(define_state::<RequestContext>);

/// Context of the request being served.
///
/// `RequestContext` is `Clone`; every clone shares the same response headers.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

struct Inner {
    procedure_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    /// Headers added to whatever response the request ends with.
    response_headers: Mutex<HeaderMap>,
}

impl RequestContext {
    /// Create a context from request parts.
    pub fn new(procedure_id: impl Into<String>, parts: &Parts) -> Self {
        Self {
            inner: Arc::new(Inner {
                procedure_id: procedure_id.into(),
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
                response_headers: Mutex::new(HeaderMap::new()),
            }),
        }
    }

    /// Id the request was addressed to.
    #[inline]
    pub fn procedure_id(&self) -> &str {
        &self.inner.procedure_id
    }

    /// Request method.
    #[inline]
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Request URI.
    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    /// Request headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A request header as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name)?.to_str().ok()
    }

    /// Value of a request cookie.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.inner
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// Add a header to the response, keeping earlier values of the same name.
    pub fn append_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.response_headers.lock().append(name, value);
    }

    /// Set a header on the response, replacing earlier values of the same name.
    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.response_headers.lock().insert(name, value);
    }

    /// Queue a `Set-Cookie` header for `name=value` on the root path.
    pub fn set_cookie(&self, name: &str, value: &str) -> Result<(), InvalidHeaderValue> {
        let cookie = HeaderValue::from_str(&format!(
            "{name}={value}; Path=/; HttpOnly; SameSite=Lax"
        ))?;
        self.append_response_header(SET_COOKIE, cookie);
        Ok(())
    }

    /// Queue a `Set-Cookie` header that expires `name`.
    pub fn clear_cookie(&self, name: &str) -> Result<(), InvalidHeaderValue> {
        let cookie = HeaderValue::from_str(&format!("{name}=; Path=/; Max-Age=0"))?;
        self.append_response_header(SET_COOKIE, cookie);
        Ok(())
    }

    /// Snapshot of the queued response headers.
    pub fn response_headers(&self) -> HeaderMap {
        self.inner.response_headers.lock().clone()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("procedure_id", &self.inner.procedure_id)
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .finish()
    }
}

/// Bind `ctx` into the current execution scope.
pub(crate) fn bind_context(ctx: RequestContext) -> Result<(), StateError> {
    CONTEXT.create_state(ctx)
}

/// Context of the request being served.
///
/// Fails outside a request scope.
pub fn use_context() -> Result<RequestContext, StateError> {
    CONTEXT.use_state_or_err()
}

/// Context of the request being served, if any.
pub fn try_use_context() -> Option<RequestContext> {
    CONTEXT.use_state().ok().flatten()
}

//! Procedure registry keyed by both id forms.
//!
//! Every procedure is reachable under its plain id and its hashed id. Both
//! forms share one keyspace, so a plain id of one procedure that equals the
//! hashed id of another is a duplicate like any other.
//!
//! The registry is built once and read-only afterwards; lookups take no lock.
//!
//! # Example
//!
//! ```
//! use seamless_rpc::procedure::Registry;
//!
//! async fn login(username: String) -> String {
//!     format!("welcome, {username}")
//! }
//!
//! let registry = Registry::builder()
//!     .procedure("components/chat_server.rs", "login", login)
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.contains("components/chat_server/login"));
//! assert_eq!(registry.len(), 2); // plain + hashed
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::handler::{BoxFuture, Handler, ProcedureFn, ProcedureResult, TypedHandler};
use super::id::{hashed_id, plain_id};
use super::source::{normalize_path, ProcedureDef, SourceFilter};
use super::RpcError;
use crate::config::RegistryOptions;
use crate::error::{Error, Result};

/// A registered procedure.
pub struct Procedure {
    path: String,
    name: String,
    plain_id: String,
    hashed_id: String,
    handler: Arc<dyn Handler>,
}

impl Procedure {
    /// Source path relative to the registry root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Export name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id in plain form.
    pub fn plain_id(&self) -> &str {
        &self.plain_id
    }

    /// Id in hashed form.
    pub fn hashed_id(&self) -> &str {
        &self.hashed_id
    }

    /// Invoke with positional JSON arguments.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, ProcedureResult> {
        self.handler.call(args)
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("plain_id", &self.plain_id)
            .field("hashed_id", &self.hashed_id)
            .finish()
    }
}

struct Entry {
    path: String,
    name: String,
    handler: Arc<dyn Handler>,
}

/// Collects procedures, then validates and indexes them in [`build`](Self::build).
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed async function exported as `name` from `path`.
    pub fn procedure<F, Args>(self, path: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: ProcedureFn<Args>,
        Args: 'static,
    {
        self.handler(path, name, TypedHandler::arc(f))
    }

    /// Register a type-erased handler exported as `name` from `path`.
    pub fn handler(
        mut self,
        path: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.entries.push(Entry {
            path: normalize_path(&path.into()),
            name: name.into(),
            handler,
        });
        self
    }

    /// Register every compile-time definition selected by `options`.
    pub fn discover(mut self, options: &RegistryOptions) -> Result<Self> {
        let filter = SourceFilter::new(options)?;
        let mut found = 0usize;

        for def in ProcedureDef::all() {
            if let Some(path) = filter.select(def.file) {
                self.entries.push(Entry {
                    path,
                    name: def.name.to_string(),
                    handler: (def.factory)(),
                });
                found += 1;
            }
        }

        debug!(
            root_dir = %options.root_dir,
            found,
            "Discovered procedure definitions"
        );
        Ok(self)
    }

    /// Compute ids and build the registry.
    ///
    /// Fails on the first invalid export name or duplicate id; no partial
    /// registry is ever produced.
    pub fn build(self) -> Result<Registry> {
        let mut procedures: HashMap<String, Arc<Procedure>> =
            HashMap::with_capacity(self.entries.len() * 2);

        for entry in self.entries {
            if entry.name.is_empty() || entry.name.contains('/') {
                return Err(Error::InvalidProcedureName {
                    name: entry.name,
                    path: entry.path,
                });
            }

            let procedure = Arc::new(Procedure {
                plain_id: plain_id(&entry.path, &entry.name),
                hashed_id: hashed_id(&entry.path, &entry.name),
                path: entry.path,
                name: entry.name,
                handler: entry.handler,
            });

            for id in [procedure.plain_id.clone(), procedure.hashed_id.clone()] {
                if procedures.contains_key(&id) {
                    return Err(Error::DuplicateProcedureId {
                        id,
                        path: procedure.path.clone(),
                    });
                }
                procedures.insert(id, procedure.clone());
            }
        }

        let registry = Registry { procedures };
        debug!(
            procedures = registry.procedure_count(),
            ids = registry.len(),
            "Procedure registry ready"
        );
        Ok(registry)
    }
}

/// Immutable map from procedure id to procedure.
#[derive(Default)]
pub struct Registry {
    procedures: HashMap<String, Arc<Procedure>>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registry of every compile-time definition selected by `options`.
    pub fn discover(options: &RegistryOptions) -> Result<Self> {
        RegistryBuilder::new().discover(options)?.build()
    }

    /// Look up a procedure by either id form.
    pub fn resolve(&self, id: &str) -> std::result::Result<&Arc<Procedure>, RpcError> {
        self.procedures.get(id).ok_or(RpcError::ProcedureNotFound)
    }

    /// Resolve and invoke.
    pub async fn call(&self, id: &str, args: Vec<Value>) -> ProcedureResult {
        let procedure = self.resolve(id)?.clone();
        procedure.call(args).await
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.procedures.contains_key(id)
    }

    /// Number of ids (two per procedure).
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether no procedure is registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Every registered id, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    /// Every procedure once, in no particular order.
    pub fn procedures(&self) -> impl Iterator<Item = &Arc<Procedure>> {
        self.procedures
            .iter()
            .filter(|(id, procedure)| id.as_str() == procedure.plain_id)
            .map(|(_, procedure)| procedure)
    }

    fn procedure_count(&self) -> usize {
        self.procedures().count()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("ids", &self.procedures.keys().collect::<Vec<_>>())
            .finish()
    }
}

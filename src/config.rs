//! Configuration surface shared by the registry, the server and the client.
//!
//! All structs derive `Deserialize` with field defaults so they can be loaded
//! from whatever format the hosting application uses, and expose fluent
//! setters for programmatic use.

use serde::{Deserialize, Serialize};

/// Default directory procedure source paths are resolved against.
pub const DEFAULT_ROOT_DIR: &str = "src";

/// Default include pattern: files carrying the `_server` marker.
pub const DEFAULT_INCLUDE: &str = "**/*_server.rs";

/// Default route prefix the server mounts procedures under.
pub const DEFAULT_BASE_PATH: &str = "/rpc";

/// Default base URL the client posts to.
pub const DEFAULT_URL: &str = "http://127.0.0.1:3000/rpc";

/// Default channel capacity for event streams.
pub const DEFAULT_STREAM_CAPACITY: usize = 16;

/// Default maximum request body size (2 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Which procedure definitions a [`Registry`](crate::procedure::Registry) picks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOptions {
    /// Directory that procedure source paths are made relative to.
    pub root_dir: String,
    /// Glob patterns (relative to `root_dir`) a source file must match.
    pub include: Vec<String>,
    /// Glob patterns (relative to `root_dir`) that reject a source file.
    pub exclude: Vec<String>,
}

impl RegistryOptions {
    /// Options with the default root dir and patterns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directory.
    pub fn root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// Replace the include patterns.
    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the exclude patterns.
    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            root_dir: DEFAULT_ROOT_DIR.to_string(),
            include: vec![DEFAULT_INCLUDE.to_string()],
            exclude: Vec::new(),
        }
    }
}

/// Server transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Which procedures to serve when no registry is supplied.
    pub registry: RegistryOptions,
    /// Route prefix; procedures are served at `<base_path>/<id>`.
    pub base_path: String,
    /// Largest accepted request body, in bytes.
    pub max_body_size: usize,
}

impl ServerConfig {
    /// Config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route prefix with a leading `/` and no trailing `/` (empty for the root).
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryOptions::default(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Credential forwarding mode for client requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    /// Never send or store cookies.
    Omit,
    /// Keep a cookie store; cookies only go back to the origin that set them.
    #[default]
    SameOrigin,
    /// Keep a cookie store and send cookies on every request it matches.
    Include,
}

impl Credentials {
    /// Whether this mode needs a cookie store on the HTTP client.
    pub fn uses_cookies(self) -> bool {
        !matches!(self, Credentials::Omit)
    }
}

/// Client transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL; procedure ids are appended as `<url>/<id>`.
    pub url: String,
    /// Credential forwarding mode.
    pub credentials: Credentials,
    /// Accept event-stream replies. Must match the server's use of streams.
    pub sse: bool,
    /// Use hashed procedure ids in generated stubs. `None` hashes in release builds only.
    pub hash_paths: Option<bool>,
    /// Buffered values per open stream before the reader stops pulling from the socket.
    pub stream_capacity: usize,
}

impl ClientConfig {
    /// Config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Enable or disable event-stream replies.
    pub fn sse(mut self, enabled: bool) -> Self {
        self.sse = enabled;
        self
    }

    /// Force hashed (or plain) ids in stubs.
    pub fn hash_paths(mut self, hash_paths: bool) -> Self {
        self.hash_paths = Some(hash_paths);
        self
    }

    /// Set the per-stream buffer capacity.
    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Resolved hashing mode.
    pub fn resolved_hash_paths(&self) -> bool {
        self.hash_paths.unwrap_or(!cfg!(debug_assertions))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            credentials: Credentials::default(),
            sse: false,
            hash_paths: None,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

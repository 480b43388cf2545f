//! Compile-time procedure definitions and source-path filtering.
//!
//! [`procedure!`](crate::procedure!) submits a [`ProcedureDef`] per exported
//! function into a link-time table. The set of source files that contributed
//! definitions plays the role of the project's file tree: discovery keeps
//! the files under the registry root whose relative path matches the
//! include globs and none of the exclude globs.

use std::fmt;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};

use super::Handler;
use crate::config::RegistryOptions;
use crate::error::{Error, Result};

/// A procedure registered at compile time.
pub struct ProcedureDef {
    /// Source file the definition lives in, as reported by `file!()`.
    pub file: &'static str,
    /// Export name.
    pub name: &'static str,
    /// Builds the type-erased handler.
    pub factory: fn() -> Arc<dyn Handler>,
}

impl ProcedureDef {
    /// Create a definition. Used by the `procedure!` macro.
    pub const fn new(
        file: &'static str,
        name: &'static str,
        factory: fn() -> Arc<dyn Handler>,
    ) -> Self {
        Self {
            file,
            name,
            factory,
        }
    }

    /// Iterate every definition linked into the binary.
    pub fn all() -> impl Iterator<Item = &'static ProcedureDef> {
        inventory::iter::<ProcedureDef>.into_iter()
    }
}

impl fmt::Debug for ProcedureDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDef")
            .field("file", &self.file)
            .field("name", &self.name)
            .finish()
    }
}

inventory::collect!(ProcedureDef);

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// `/`-separated path with any leading `./` removed.
pub(crate) fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Compiled include/exclude filter for one registry root.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    root: String,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl SourceFilter {
    /// Compile the patterns of `options`.
    pub fn new(options: &RegistryOptions) -> Result<Self> {
        let root = normalize_path(&options.root_dir);
        let root = match root.trim_end_matches('/') {
            "." => String::new(),
            trimmed => trimmed.to_string(),
        };

        Ok(Self {
            root,
            include: compile(&options.include)?,
            exclude: compile(&options.exclude)?,
        })
    }

    /// Path of `file` relative to the root, if it lies under it.
    ///
    /// Build tools may report paths from the workspace root rather than the
    /// package root, so a root that appears as an inner path segment also
    /// counts.
    pub fn relative_path(&self, file: &str) -> Option<String> {
        let file = normalize_path(file);
        if self.root.is_empty() {
            return Some(file);
        }

        let prefix = format!("{}/", self.root);
        if let Some(rest) = file.strip_prefix(&prefix) {
            return Some(rest.to_string());
        }

        let segment = format!("/{prefix}");
        file.find(&segment)
            .map(|at| file[at + segment.len()..].to_string())
    }

    /// Whether a root-relative path is selected.
    pub fn matches(&self, relative: &str) -> bool {
        self.include
            .iter()
            .any(|p| p.matches_with(relative, MATCH_OPTIONS))
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(relative, MATCH_OPTIONS))
    }

    /// Relative path of `file` when it is selected.
    pub fn select(&self, file: &str) -> Option<String> {
        self.relative_path(file).filter(|rel| self.matches(rel))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|source| Error::Pattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

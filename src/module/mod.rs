//! Script modules: where their source comes from and how it reaches the
//! interpreter's module table
//!
//! Loading is two-phase. [`ModuleFeed::resolve`] gathers every source of a
//! batch (fetching remote ones concurrently) and only a fully resolved batch is
//! handed to [`ModuleRegistry::register_all`].

pub mod bundled;
pub mod feed;
pub mod registry;

pub use feed::{Fetch, FetchFailure, HttpFetcher, ModuleFeed};
pub use registry::ModuleRegistry;

use std::fmt;
use std::path::PathBuf;

/// Where a registered module's source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Supplied in memory by the embedding application or the config
    Static,
    /// Shipped inside this crate
    Bundled,
    /// Read from a local file
    File(PathBuf),
    /// Downloaded from a URL
    Fetched(String),
}

impl fmt::Display for ModuleOrigin {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ModuleOrigin::Static => write!(f, "static"),
            ModuleOrigin::Bundled => write!(f, "bundled"),
            ModuleOrigin::File(path) => write!(f, "file {}", path.display()),
            ModuleOrigin::Fetched(url) => write!(f, "fetched {url}"),
        }
    }
}

/// How to obtain a module's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLocation {
    /// Source text already in memory
    Inline(String),
    /// One of the modules shipped with the crate, looked up by name
    Bundled,
    /// Local file
    File(PathBuf),
    /// Remote location
    Remote(String),
}

/// A module declaration: unique name plus location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub location: ModuleLocation,
}

impl ModuleSpec {
    pub fn inline(
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: ModuleLocation::Inline(source.into()),
        }
    }

    pub fn bundled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: ModuleLocation::Bundled,
        }
    }

    pub fn file(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            location: ModuleLocation::File(path.into()),
        }
    }

    pub fn remote(
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: ModuleLocation::Remote(url.into()),
        }
    }
}

/// A module whose source is in hand, ready for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub name: String,
    pub source: String,
    pub origin: ModuleOrigin,
}

impl ResolvedModule {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        origin: ModuleOrigin,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            origin,
        }
    }
}

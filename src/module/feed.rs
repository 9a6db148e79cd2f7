//! Module source feed
//!
//! Resolves a batch of [`ModuleSpec`]s into [`ResolvedModule`]s. Remote
//! sources are fetched concurrently; the batch either resolves completely or
//! fails with the first [`TransportError`], so a partial batch is never seen
//! by the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{bundled, ModuleLocation, ModuleOrigin, ModuleSpec, ResolvedModule};
use crate::error::TransportError;

/// Why a single fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The server answered with a non-success status
    Status(u16),
    /// No usable response
    Transport(String),
}

impl FetchFailure {
    fn into_transport_error(
        self,
        module: &str,
        url: &str,
    ) -> TransportError {
        let (status, message) = match self {
            FetchFailure::Status(code) => (Some(code), format!("HTTP status {code}")),
            FetchFailure::Transport(message) => (None, message),
        };
        TransportError {
            module: module.to_string(),
            url: url.to_string(),
            status,
            message,
        }
    }
}

/// Fetch capability: download the text behind a URL.
///
/// Called from the blocking pool, so implementations may block.
pub trait Fetch: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &str,
    ) -> Result<String, FetchFailure>;
}

/// HTTP fetcher backed by a shared `ureq` agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Fetch for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
    ) -> Result<String, FetchFailure> {
        match self.agent.get(url).call() {
            Ok(response) => response
                .into_string()
                .map_err(|e| FetchFailure::Transport(e.to_string())),
            Err(ureq::Error::Status(code, _)) => Err(FetchFailure::Status(code)),
            Err(ureq::Error::Transport(transport)) => {
                Err(FetchFailure::Transport(transport.to_string()))
            }
        }
    }
}

/// Turns module declarations into module sources.
#[derive(Clone)]
pub struct ModuleFeed {
    fetcher: Arc<dyn Fetch>,
}

impl ModuleFeed {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// Resolve every spec, preserving declaration order.
    pub async fn resolve(
        &self,
        specs: &[ModuleSpec],
    ) -> Result<Vec<ResolvedModule>, TransportError> {
        let mut slots: Vec<Option<ResolvedModule>> = (0..specs.len()).map(|_| None).collect();
        let mut pending = JoinSet::new();

        for (index, spec) in specs.iter().enumerate() {
            match &spec.location {
                ModuleLocation::Inline(source) => {
                    slots[index] = Some(ResolvedModule::new(&spec.name, source, ModuleOrigin::Static));
                }
                ModuleLocation::Bundled => {
                    let source = bundled::source(&spec.name).ok_or_else(|| TransportError {
                        module: spec.name.clone(),
                        url: format!("bundled:{}", spec.name),
                        status: None,
                        message: "no bundled module with this name".to_string(),
                    })?;
                    slots[index] = Some(ResolvedModule::new(&spec.name, source, ModuleOrigin::Bundled));
                }
                ModuleLocation::File(path) => {
                    let source = tokio::fs::read_to_string(path).await.map_err(|e| TransportError {
                        module: spec.name.clone(),
                        url: path.display().to_string(),
                        status: None,
                        message: e.to_string(),
                    })?;
                    slots[index] = Some(ResolvedModule::new(
                        &spec.name,
                        source,
                        ModuleOrigin::File(path.clone()),
                    ));
                }
                ModuleLocation::Remote(url) => {
                    let fetcher = Arc::clone(&self.fetcher);
                    let name = spec.name.clone();
                    let url = url.clone();
                    pending.spawn_blocking(move || {
                        debug!(module = %name, %url, "fetching module");
                        let result = fetcher
                            .fetch(&url)
                            .map(|source| ResolvedModule::new(&name, source, ModuleOrigin::Fetched(url.clone())))
                            .map_err(|failure| failure.into_transport_error(&name, &url));
                        (index, result)
                    });
                }
            }
        }

        let fetched = pending.len();
        while let Some(joined) = pending.join_next().await {
            let (index, result) = joined.map_err(|e| TransportError {
                module: "<unknown>".to_string(),
                url: String::new(),
                status: None,
                message: format!("fetch task failed: {e}"),
            })?;
            // Returning drops the set, which aborts the fetches still queued.
            slots[index] = Some(result?);
        }

        info!(total = specs.len(), fetched, "module batch resolved");
        Ok(slots.into_iter().flatten().collect())
    }
}

impl Default for ModuleFeed {
    fn default() -> Self {
        Self::new(Arc::new(HttpFetcher::default()))
    }
}

impl std::fmt::Debug for ModuleFeed {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ModuleFeed").finish_non_exhaustive()
    }
}

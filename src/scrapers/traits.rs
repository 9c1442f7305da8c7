use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Location, Source, SourceResult};
use async_trait::async_trait;

/// Common contract for all marketplace extractors.
/// Each marketplace is a swappable implementation so new sources slot in
/// without touching the orchestrator.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Which marketplace this extractor targets.
    fn source(&self) -> Source;

    /// Whether the marketplace serves the given region at all. Gated
    /// extractors are skipped without any navigation.
    fn supports(&self, location: Location) -> bool {
        let _ = location;
        true
    }

    /// Deterministic search URL for the query and region. Also used as the
    /// deep-link fallback when extraction fails.
    fn search_url(&self, query: &str, location: Location) -> String;

    /// Run the search and extract normalized listings.
    ///
    /// All site-level failures (timeouts, bot walls, broken markup) are
    /// folded into an error-status `SourceResult`; only browser-acquisition
    /// failures surface as `Err` so the orchestrator can react pool-wide.
    async fn extract(
        &self,
        ctx: &DeploymentContext,
        query: &str,
        location: Location,
    ) -> Result<SourceResult, ScrapeError>;
}

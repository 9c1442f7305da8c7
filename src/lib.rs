pub mod agent;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod scrapers;

pub use config::DeploymentContext;
pub use error::{RequestError, ScrapeError};
pub use models::{ComparisonResponse, Listing, SearchRequest, SourceResult};
pub use orchestrator::Orchestrator;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{DeploymentContext, RuntimeEnv};
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source};

/// Liveness probe budget. The agent either answers instantly or is down.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// AI-driven browsing is slow; give a single search minutes, not seconds.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Bridge to the external AI browsing agent. Tried before the traditional
/// extractor when the service is up; never raced against it.
pub struct FallbackBridge {
    client: Client,
    base_url: String,
    runtime: RuntimeEnv,
}

#[derive(Deserialize)]
struct Health {
    status: String,
}

#[derive(Deserialize)]
struct AgentItem {
    title: String,
    price: f64,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Deserialize)]
struct AgentResponse {
    success: bool,
    #[serde(default)]
    results: Vec<AgentItem>,
    #[serde(default)]
    error: Option<String>,
}

impl FallbackBridge {
    pub fn new(ctx: &DeploymentContext) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create agent HTTP client")?;
        Ok(Self {
            client,
            base_url: ctx.agent_base_url.trim_end_matches('/').to_string(),
            runtime: ctx.runtime,
        })
    }

    /// A production deployment pointed at a loopback address can never
    /// reach the agent; skip the probe instead of burning its timeout.
    pub fn probe_allowed(&self) -> bool {
        let loopback =
            self.base_url.contains("localhost") || self.base_url.contains("127.0.0.1");
        !(self.runtime == RuntimeEnv::Serverless && loopback)
    }

    /// One liveness probe per comparison request.
    pub async fn is_available(&self) -> bool {
        if !self.probe_allowed() {
            debug!("agent probe skipped: loopback target in production");
            return false;
        }
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(resp) => resp
                .json::<Health>()
                .await
                .map(|h| h.status == "online")
                .unwrap_or(false),
            Err(e) => {
                debug!(error = %e, "agent unavailable");
                false
            }
        }
    }

    /// Ask the agent to search one marketplace. Transport failures and
    /// agent-reported failures both surface as `UpstreamAgent` so the
    /// caller falls straight back to the traditional extractor.
    pub async fn search(
        &self,
        query: &str,
        source: Source,
        location: Location,
    ) -> Result<Vec<Listing>, ScrapeError> {
        let url = format!("{}/search/{}", self.base_url, source.id());
        info!(%url, query, "querying browsing agent");

        let response = self
            .client
            .get(&url)
            .query(&[("query", query), ("location", location.code())])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ScrapeError::UpstreamAgent(e.to_string()))?;

        let body: AgentResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::UpstreamAgent(e.to_string()))?;

        if !body.success {
            return Err(ScrapeError::UpstreamAgent(
                body.error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ));
        }

        let currency = location.currency();
        let listings = body
            .results
            .into_iter()
            .filter_map(|item| agent_listing(item, source, currency))
            .collect::<Vec<_>>();

        if listings.is_empty() {
            warn!(source = source.label(), "agent returned no usable results");
        }
        Ok(listings)
    }
}

/// The price floor applies to agent results exactly as it does to scraped
/// candidates.
fn agent_listing(item: AgentItem, source: Source, currency: Currency) -> Option<Listing> {
    if !item.price.is_finite() || item.price <= 0.0 || item.title.trim().is_empty() {
        return None;
    }
    Some(Listing {
        source,
        title: item.title.trim().to_string(),
        price: item.price,
        currency,
        link: item.link?,
        image: item.image,
        condition: item.condition.unwrap_or_else(|| "Used".to_string()),
        original_price: item.price.to_string(),
        location: None,
        shipping: None,
        warranty: None,
        stock: None,
        date: None,
    })
}

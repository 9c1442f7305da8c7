use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::agent::FallbackBridge;
use crate::config::{ConcurrencyPolicy, DeploymentContext};
use crate::error::ScrapeError;
use crate::models::{
    ComparisonResponse, DebugReport, Listing, Location, PopularProduct, SearchRequest, Source,
    SourceDiagnostic, SourceResult,
};
use crate::scrapers::{self, Extractor};

/// Runs the applicable extractors for a request, isolates their failures,
/// throttles the shared browser-process budget, and merges the output into
/// one comparison payload.
pub struct Orchestrator {
    ctx: DeploymentContext,
    extractors: Vec<Box<dyn Extractor>>,
    bridge: Option<FallbackBridge>,
}

impl Orchestrator {
    pub fn new(ctx: DeploymentContext) -> Self {
        let bridge = FallbackBridge::new(&ctx)
            .map_err(|e| warn!(error = %e, "fallback bridge disabled"))
            .ok();
        Self {
            extractors: scrapers::all_extractors(),
            ctx,
            bridge,
        }
    }

    /// Custom extractor set, used by tests and by callers that want a
    /// reduced pool.
    pub fn with_extractors(
        ctx: DeploymentContext,
        extractors: Vec<Box<dyn Extractor>>,
        bridge: Option<FallbackBridge>,
    ) -> Self {
        Self {
            ctx,
            extractors,
            bridge,
        }
    }

    pub async fn compare(&self, request: &SearchRequest) -> ComparisonResponse {
        let started = Instant::now();
        info!(
            query = %request.query,
            location = request.location.code(),
            source = request.source.map(|s| s.id()).unwrap_or("all"),
            "comparison started"
        );

        let selected: Vec<&dyn Extractor> = self
            .extractors
            .iter()
            .filter(|e| request.source.map_or(true, |s| e.source() == s))
            .map(|b| b.as_ref())
            .collect();

        // One probe per request; every slot shares the answer.
        let agent_available = match &self.bridge {
            Some(bridge) => bridge.is_available().await,
            None => false,
        };
        if agent_available {
            info!("browsing agent online, trying it before direct scraping");
        }

        let results = match self.ctx.policy {
            ConcurrencyPolicy::Parallel => {
                join_all(
                    selected
                        .iter()
                        .map(|ex| self.run_slot(*ex, request, agent_available)),
                )
                .await
            }
            ConcurrencyPolicy::Batched { batch_size, pause } => {
                self.run_batched(&selected, request, agent_available, batch_size, pause)
                    .await
            }
        };

        let combined_listings = merge_listings(&results);
        let (cex_cash_price_low, cex_cash_price_high) = cash_band(&results);

        let per_source_urls: BTreeMap<&'static str, String> = results
            .iter()
            .map(|r| (r.source.id(), r.source_url.clone()))
            .collect();

        let per_source_status: Vec<SourceDiagnostic> = results
            .iter()
            .map(|r| SourceDiagnostic {
                name: r.source.label(),
                id: r.source.id(),
                status: r.status,
                count: r.listings.len() + r.cash_offers.len(),
                error: r.error.clone(),
            })
            .collect();

        let total_time_ms = started.elapsed().as_millis() as u64;
        info!(
            listings = combined_listings.len(),
            total_time_ms, "comparison finished"
        );

        ComparisonResponse {
            query: request.query.clone(),
            timestamp: Utc::now(),
            combined_listings,
            per_source_urls,
            cex_cash_price_low,
            cex_cash_price_high,
            debug: DebugReport {
                total_time_ms,
                per_source_status,
            },
        }
    }

    /// Popular-products surface: one lightweight scan of eBay's top
    /// results.
    pub async fn popular(
        &self,
        query: &str,
        location: Location,
        count: usize,
    ) -> Result<Vec<PopularProduct>, ScrapeError> {
        scrapers::popular::popular_products(&self.ctx, query, location, count).await
    }

    /// Batched execution for constrained hosts: at most `batch_size`
    /// browser processes live at once, with a pause between batches. A
    /// browser-acquisition failure poisons the remaining batches: the
    /// runtime has no browser, so further attempts would only burn the
    /// invocation budget.
    async fn run_batched(
        &self,
        selected: &[&dyn Extractor],
        request: &SearchRequest,
        agent_available: bool,
        batch_size: usize,
        pause: std::time::Duration,
    ) -> Vec<SourceResult> {
        let mut out = Vec::with_capacity(selected.len());
        let mut halt: Option<String> = None;

        for batch in selected.chunks(batch_size.max(1)) {
            if let Some(message) = &halt {
                for ex in batch {
                    out.push(SourceResult::errored(
                        ex.source(),
                        ex.search_url(&request.query, request.location),
                        format!("browser unavailable: {message}"),
                    ));
                }
                continue;
            }

            if !out.is_empty() && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let batch_results = join_all(
                batch
                    .iter()
                    .map(|ex| self.run_slot_raw(*ex, request, agent_available)),
            )
            .await;

            for (ex, outcome) in batch.iter().zip(batch_results) {
                match outcome {
                    Ok(result) => out.push(result),
                    Err(e) => {
                        let message = e.to_string();
                        if e.is_browser_acquisition() {
                            warn!(%message, "browser acquisition failed, short-circuiting pool");
                            halt = Some(message.clone());
                        }
                        out.push(SourceResult::errored(
                            ex.source(),
                            ex.search_url(&request.query, request.location),
                            message,
                        ));
                    }
                }
            }
        }

        out
    }

    /// One extractor slot with every failure folded into a result; used in
    /// parallel mode where there is nothing left to short-circuit.
    async fn run_slot(
        &self,
        extractor: &dyn Extractor,
        request: &SearchRequest,
        agent_available: bool,
    ) -> SourceResult {
        match self.run_slot_raw(extractor, request, agent_available).await {
            Ok(result) => result,
            Err(e) => SourceResult::errored(
                extractor.source(),
                extractor.search_url(&request.query, request.location),
                e,
            ),
        }
    }

    /// Fallback chain for one source: agent first when it is up, then the
    /// traditional extractor. Never both at once.
    async fn run_slot_raw(
        &self,
        extractor: &dyn Extractor,
        request: &SearchRequest,
        agent_available: bool,
    ) -> Result<SourceResult, ScrapeError> {
        let source = extractor.source();

        if !extractor.supports(request.location) {
            debug!(source = source.label(), "skipped: unsupported region");
            return Ok(SourceResult::skipped(source));
        }

        if source == Source::Facebook && self.ctx.facebook_disabled() {
            info!("Facebook disabled in this deployment");
            return Ok(SourceResult::errored(
                source,
                extractor.search_url(&request.query, request.location),
                "Facebook disabled in constrained deployment",
            ));
        }

        // The agent never handles the sell side; cash offers need the
        // dedicated extractor shape.
        if agent_available && source != Source::CexSell {
            if let Some(bridge) = &self.bridge {
                match bridge.search(&request.query, source, request.location).await {
                    Ok(listings) if !listings.is_empty() => {
                        info!(
                            source = source.label(),
                            count = listings.len(),
                            "agent satisfied the search"
                        );
                        return Ok(SourceResult::success(
                            source,
                            extractor.search_url(&request.query, request.location),
                            listings,
                        ));
                    }
                    Ok(_) => {
                        debug!(source = source.label(), "agent empty, using extractor")
                    }
                    Err(e) => {
                        warn!(source = source.label(), error = %e, "agent failed, using extractor")
                    }
                }
            }
        }

        extractor
            .extract(&self.ctx, &request.query, request.location)
            .await
    }
}

/// Concatenate every source's listings and sort ascending by price. The
/// sort is stable, so insertion order decides ties.
fn merge_listings(results: &[SourceResult]) -> Vec<Listing> {
    let mut combined: Vec<Listing> = results
        .iter()
        .flat_map(|r| r.listings.iter().cloned())
        .collect();
    combined.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(Ordering::Equal));
    combined
}

/// Resale band over all cash offers. Zeroes mean "no data", not "free".
fn cash_band(results: &[SourceResult]) -> (f64, f64) {
    let prices: Vec<f64> = results
        .iter()
        .filter(|r| r.source == Source::CexSell)
        .flat_map(|r| r.cash_offers.iter().map(|o| o.cash_price))
        .collect();
    if prices.is_empty() {
        return (0.0, 0.0);
    }
    let low = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let high = prices.iter().cloned().fold(0.0, f64::max);
    (low, high)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::RuntimeEnv;
    use crate::models::{CashOffer, Currency, SourceStatus};

    enum StubOutcome {
        Listings(Vec<f64>),
        Offers(Vec<f64>),
        Fail(&'static str),
        NoBrowser(&'static str),
    }

    struct StubExtractor {
        source: Source,
        outcome: StubOutcome,
        calls: Arc<AtomicUsize>,
    }

    impl StubExtractor {
        fn new(source: Source, outcome: StubOutcome) -> (Box<dyn Extractor>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    source,
                    outcome,
                    calls: calls.clone(),
                }),
                calls,
            )
        }
    }

    fn listing(source: Source, price: f64) -> Listing {
        Listing {
            source,
            title: format!("{} item at {price}", source.label()),
            price,
            currency: Currency::Gbp,
            link: format!("https://example.com/{}/{price}", source.id()),
            image: None,
            condition: "Used".into(),
            original_price: format!("£{price}"),
            location: None,
            shipping: None,
            warranty: None,
            stock: None,
            date: None,
        }
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        fn source(&self) -> Source {
            self.source
        }

        fn search_url(&self, query: &str, _location: Location) -> String {
            format!("https://example.com/{}/search?q={query}", self.source.id())
        }

        async fn extract(
            &self,
            _ctx: &DeploymentContext,
            _query: &str,
            _location: Location,
        ) -> Result<SourceResult, ScrapeError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            match &self.outcome {
                StubOutcome::Listings(prices) => Ok(SourceResult::success(
                    self.source,
                    self.search_url("q", Location::Uk),
                    prices.iter().map(|p| listing(self.source, *p)).collect(),
                )),
                StubOutcome::Offers(prices) => Ok(SourceResult::offers(
                    self.source,
                    self.search_url("q", Location::Uk),
                    prices
                        .iter()
                        .map(|p| CashOffer {
                            title: "offer".into(),
                            cash_price: *p,
                            currency: Currency::Gbp,
                            image: None,
                        })
                        .collect(),
                )),
                StubOutcome::Fail(message) => Err(ScrapeError::Navigation(message.to_string())),
                StubOutcome::NoBrowser(message) => {
                    Err(ScrapeError::BrowserAcquisition(message.to_string()))
                }
            }
        }
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest::new(query, Location::Uk, None).unwrap()
    }

    #[tokio::test]
    async fn partial_failure_keeps_sibling_results() {
        let (a, _) = StubExtractor::new(Source::Ebay, StubOutcome::Fail("net::ERR_TIMED_OUT"));
        let (b, _) = StubExtractor::new(Source::Cex, StubOutcome::Listings(vec![200.0]));
        let (c, _) = StubExtractor::new(Source::Gumtree, StubOutcome::Listings(vec![100.0]));

        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![a, b, c], None);
        let response = orch.compare(&request("ipad")).await;

        let prices: Vec<f64> = response.combined_listings.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![100.0, 200.0]);

        let diag = &response.debug.per_source_status[0];
        assert_eq!(diag.id, "ebay");
        assert_eq!(diag.status, SourceStatus::Error);
        assert!(diag.error.as_deref().unwrap().contains("ERR_TIMED_OUT"));
        assert_eq!(response.debug.per_source_status[1].status, SourceStatus::Success);
    }

    #[tokio::test]
    async fn merged_listings_sorted_ascending_with_stable_ties() {
        let (a, _) = StubExtractor::new(Source::Ebay, StubOutcome::Listings(vec![300.0, 150.0]));
        let (b, _) = StubExtractor::new(Source::Cex, StubOutcome::Listings(vec![150.0, 80.0]));

        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![a, b], None);
        let response = orch.compare(&request("ipad")).await;

        let prices: Vec<f64> = response.combined_listings.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![80.0, 150.0, 150.0, 300.0]);
        // eBay's 150 was inserted first, so it stays ahead of CeX's on the tie.
        assert_eq!(response.combined_listings[1].source, Source::Ebay);
        assert_eq!(response.combined_listings[2].source, Source::Cex);
    }

    #[tokio::test]
    async fn acquisition_failure_short_circuits_batched_pool() {
        let (a, a_calls) =
            StubExtractor::new(Source::Ebay, StubOutcome::NoBrowser("no chrome binary"));
        let (b, b_calls) = StubExtractor::new(Source::Cex, StubOutcome::Listings(vec![50.0]));
        let (c, c_calls) = StubExtractor::new(Source::Gumtree, StubOutcome::Listings(vec![60.0]));

        let mut ctx = DeploymentContext::local();
        ctx.policy = ConcurrencyPolicy::Batched {
            batch_size: 1,
            pause: Duration::from_millis(0),
        };

        let orch = Orchestrator::with_extractors(ctx, vec![a, b, c], None);
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(a_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(b_calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(c_calls.load(AtomicOrdering::SeqCst), 0);

        assert!(response.combined_listings.is_empty());
        for diag in &response.debug.per_source_status {
            assert_eq!(diag.status, SourceStatus::Error);
        }
        assert!(response.debug.per_source_status[1]
            .error
            .as_deref()
            .unwrap()
            .contains("browser unavailable"));
    }

    #[tokio::test]
    async fn acquisition_failure_does_not_poison_parallel_pool() {
        let (a, _) = StubExtractor::new(Source::Ebay, StubOutcome::NoBrowser("no chrome"));
        let (b, b_calls) = StubExtractor::new(Source::Cex, StubOutcome::Listings(vec![50.0]));

        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![a, b], None);
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(b_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(response.combined_listings.len(), 1);
    }

    #[tokio::test]
    async fn cash_band_spans_min_and_max_offers() {
        let (sell, _) = StubExtractor::new(
            Source::CexSell,
            StubOutcome::Offers(vec![120.0, 95.0, 150.0]),
        );
        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![sell], None);
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(response.cex_cash_price_low, 95.0);
        assert_eq!(response.cex_cash_price_high, 150.0);
        assert_eq!(response.debug.per_source_status[0].count, 3);
        // Offers never leak into the buy-side comparison.
        assert!(response.combined_listings.is_empty());
    }

    #[tokio::test]
    async fn empty_cash_offers_yield_zero_band() {
        let (sell, _) = StubExtractor::new(Source::CexSell, StubOutcome::Offers(vec![]));
        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![sell], None);
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(response.cex_cash_price_low, 0.0);
        assert_eq!(response.cex_cash_price_high, 0.0);
    }

    #[tokio::test]
    async fn facebook_flag_skips_navigation() {
        let (fb, fb_calls) =
            StubExtractor::new(Source::Facebook, StubOutcome::Listings(vec![10.0]));
        let mut ctx = DeploymentContext::local();
        ctx.runtime = RuntimeEnv::Serverless;
        ctx.skip_facebook = true;

        let orch = Orchestrator::with_extractors(ctx, vec![fb], None);
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(fb_calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(response.debug.per_source_status[0].status, SourceStatus::Error);
    }

    #[tokio::test]
    async fn source_filter_runs_only_that_extractor() {
        let (a, a_calls) = StubExtractor::new(Source::Ebay, StubOutcome::Listings(vec![10.0]));
        let (b, b_calls) = StubExtractor::new(Source::Cex, StubOutcome::Listings(vec![20.0]));

        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![a, b], None);
        let req = SearchRequest::new("ipad", Location::Uk, Some("cex")).unwrap();
        let response = orch.compare(&req).await;

        assert_eq!(a_calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(b_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(response.debug.per_source_status.len(), 1);
        assert_eq!(response.debug.per_source_status[0].id, "cex");
    }

    #[tokio::test]
    async fn unavailable_agent_means_extractor_runs_exactly_once() {
        let (a, a_calls) = StubExtractor::new(Source::Ebay, StubOutcome::Listings(vec![42.0]));

        // Serverless runtime + loopback agent target: the probe is refused
        // before any network traffic, so the agent search never happens.
        let mut ctx = DeploymentContext::local();
        ctx.runtime = RuntimeEnv::Serverless;
        let bridge = FallbackBridge::new(&ctx).unwrap();
        assert!(!bridge.probe_allowed());

        let orch = Orchestrator::with_extractors(ctx, vec![a], Some(bridge));
        let response = orch.compare(&request("ipad")).await;

        assert_eq!(a_calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(response.combined_listings.len(), 1);
        assert_eq!(response.combined_listings[0].price, 42.0);
    }

    /// Extractor fed a canned rendered page, run through the real eBay
    /// extraction heuristics.
    struct HtmlBackedExtractor {
        html: String,
    }

    #[async_trait]
    impl Extractor for HtmlBackedExtractor {
        fn source(&self) -> Source {
            Source::Ebay
        }

        fn search_url(&self, query: &str, _location: Location) -> String {
            format!("https://www.ebay.co.uk/sch/i.html?_nkw={query}")
        }

        async fn extract(
            &self,
            _ctx: &DeploymentContext,
            query: &str,
            location: Location,
        ) -> Result<SourceResult, ScrapeError> {
            let listings =
                crate::scrapers::ebay::extract_listings(&self.html, location.currency());
            Ok(SourceResult::success(
                self.source(),
                self.search_url(query, location),
                listings,
            ))
        }
    }

    #[tokio::test]
    async fn ebay_page_end_to_end() {
        let card = |id: u32, title: &str, price: &str| {
            format!(
                r#"<li class="s-item"><a class="s-item__link" href="https://www.ebay.co.uk/itm/{id}">
                   <div class="s-item__title">{title}</div>
                   <span class="s-item__price">{price}</span></a></li>"#
            )
        };
        let html = format!(
            "<ul>{}{}{}<li class=\"s-item\"><div class=\"s-item__title\">Malformed iPad card</div></li></ul>",
            card(1, "Apple iPad 9th Gen 64GB", "£200.00"),
            card(2, "Apple iPad Air 2 32GB", "£150.00"),
            card(3, "Apple iPad Pro 11 128GB", "£300.00"),
        );

        let orch = Orchestrator::with_extractors(
            DeploymentContext::local(),
            vec![Box::new(HtmlBackedExtractor { html })],
            None,
        );
        let response = orch.compare(&request("ipad")).await;

        let prices: Vec<f64> = response.combined_listings.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![150.0, 200.0, 300.0]);

        let diag = &response.debug.per_source_status[0];
        assert_eq!(diag.status, SourceStatus::Success);
        assert_eq!(diag.count, 3);
    }

    #[tokio::test]
    async fn diagnostics_preserve_invocation_order() {
        let (a, _) = StubExtractor::new(Source::Gumtree, StubOutcome::Listings(vec![1.0]));
        let (b, _) = StubExtractor::new(Source::Ebay, StubOutcome::Listings(vec![2.0]));
        let (c, _) = StubExtractor::new(Source::Cex, StubOutcome::Fail("boom"));

        let orch = Orchestrator::with_extractors(DeploymentContext::local(), vec![a, b, c], None);
        let response = orch.compare(&request("ipad")).await;

        let ids: Vec<&str> = response
            .debug
            .per_source_status
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["gumtree", "ebay", "cex"]);
    }
}

use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{dedupe_and_cap, first_image, parse_price, price_text, scan_anchor_cards};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 10;

/// CashConverters shop extractor. UK only; generic anchor scan, same as
/// MusicMagpie but with a looser length threshold because shop cards are
/// terse.
pub struct CashConvertersExtractor;

#[async_trait]
impl Extractor for CashConvertersExtractor {
    fn source(&self) -> Source {
        Source::CashConverters
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://www.cashconverters.co.uk/shop?search={}",
            urlencoding::encode(query)
        )
    }

    async fn extract(
        &self,
        ctx: &DeploymentContext,
        query: &str,
        location: Location,
    ) -> Result<SourceResult, ScrapeError> {
        if !self.supports(location) {
            return Ok(SourceResult::skipped(self.source()));
        }
        let url = self.search_url(query, location);
        debug!(%url, "CashConverters search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: None,
            settle: Duration::from_secs(3),
            scroll_passes: 1,
            nav_timeout: Duration::from_secs(40),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html);
        info!(count = listings.len(), "CashConverters extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let candidates = scan_anchor_cards(&doc, '£', 5)
        .into_iter()
        .filter_map(|anchor| {
            let price = parse_price(&anchor.text)?;
            let title = anchor
                .lines
                .iter()
                .find(|l| !l.contains('£') && l.len() > 5)
                .or_else(|| anchor.lines.first())?
                .trim()
                .to_string();

            Some(Listing {
                source: Source::CashConverters,
                title,
                price,
                currency: Currency::Gbp,
                link: anchor.href.clone(),
                image: first_image(anchor.el),
                condition: "Used".to_string(),
                original_price: price_text(&anchor.text).unwrap_or_else(|| price.to_string()),
                location: Some("UK Store".to_string()),
                shipping: None,
                warranty: None,
                stock: None,
                date: None,
            })
        })
        .collect();

    dedupe_and_cap(candidates, MAX_LISTINGS)
}

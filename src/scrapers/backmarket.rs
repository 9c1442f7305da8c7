use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{
    absolutize, dedupe_and_cap, first_attr, first_image, first_text, joined_text,
    parse_price, price_text, sel,
};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 10;

// Product tiles plus a blanket `li` sweep; the text heuristics below weed
// out the non-product list items.
static CARD_SEL: Lazy<Selector> =
    Lazy::new(|| sel(r#"div[data-test="product-item"], a[data-test="product-item"], li"#));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| sel("h2, h3, .productTitle"));
static ANY_LINK_SEL: Lazy<Selector> = Lazy::new(|| sel("a"));

/// BackMarket refurbished-electronics extractor. UK only; sits behind
/// Cloudflare, so bot walls are a routine outcome here.
pub struct BackMarketExtractor;

#[async_trait]
impl Extractor for BackMarketExtractor {
    fn source(&self) -> Source {
        Source::BackMarket
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://www.backmarket.co.uk/en-gb/search?q={}",
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
        debug!(%url, "BackMarket search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: Some(r#"div[data-test="product-item"], div.productCard, main"#),
            settle: Duration::from_secs(5),
            scroll_passes: 5,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html);
        info!(count = listings.len(), "BackMarket extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let candidates = doc
        .select(&CARD_SEL)
        .filter_map(listing_from_card)
        .collect();
    dedupe_and_cap(candidates, MAX_LISTINGS)
}

fn listing_from_card(card: ElementRef) -> Option<Listing> {
    let text = joined_text(card);
    if !text.contains('£') {
        return None;
    }

    let link = if card.value().name() == "a" {
        card.value().attr("href").map(str::to_string)
    } else {
        first_attr(card, &ANY_LINK_SEL, "href")
    }?;

    let title = first_text(card, &TITLE_SEL).filter(|t| t.len() > 5)?;
    let price = parse_price(&text)?;

    Some(Listing {
        source: Source::BackMarket,
        title: title.trim().to_string(),
        price,
        currency: Currency::Gbp,
        link: absolutize(&link, "https://www.backmarket.co.uk"),
        image: first_image(card),
        condition: "Refurbished".to_string(),
        original_price: price_text(&text).unwrap_or_else(|| price.to_string()),
        location: None,
        shipping: None,
        warranty: Some("12 Month Warranty".to_string()),
        stock: Some("In Stock".to_string()),
        date: None,
    })
}

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{
    absolutize, dedupe_and_cap, fallback_title, first_attr, first_image, first_text,
    parse_price, price_text, scan_anchor_cards, sel, MAX_SANE_PRICE,
};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 10;
const MIN_STRUCTURAL_HITS: usize = 2;

static CARD_SEL: Lazy<Selector> = Lazy::new(|| sel(".cx-card-product"));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| sel(".line-clamp"));
static PRICE_SEL: Lazy<Selector> = Lazy::new(|| sel(".product-main-price"));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"a[href*="product-detail"]"#));
static STOCK_SEL: Lazy<Selector> = Lazy::new(|| sel(".product-stock-availability"));

/// CeX buy-side extractor. UK only; refurbished stock with a store
/// warranty, so condition and warranty are fixed annotations.
pub struct CexExtractor;

#[async_trait]
impl Extractor for CexExtractor {
    fn source(&self) -> Source {
        Source::Cex
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://uk.webuy.com/search?stext={}",
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
        debug!(%url, "CeX search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: Some(".cx-card-product"),
            settle: Duration::from_secs(5),
            scroll_passes: 0,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html);
        info!(count = listings.len(), "CeX extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let mut candidates: Vec<Listing> = doc
        .select(&CARD_SEL)
        .filter_map(|card| {
            let title = first_text(card, &TITLE_SEL)?;
            let price_raw = first_text(card, &PRICE_SEL)?;
            let price = parse_price(&price_raw).filter(|p| *p < MAX_SANE_PRICE)?;

            let link = first_attr(card, &LINK_SEL, "href")
                .map(|href| absolutize(&href, "https://uk.webuy.com"))
                .unwrap_or_else(|| "https://uk.webuy.com".to_string());

            Some(Listing {
                source: Source::Cex,
                title: title.trim().to_string(),
                price,
                currency: Currency::Gbp,
                link,
                image: first_image(card),
                condition: "Used (Refurbished)".to_string(),
                original_price: price_text(&price_raw).unwrap_or(price_raw),
                location: None,
                shipping: None,
                warranty: Some("24 Month Warranty".to_string()),
                stock: first_text(card, &STOCK_SEL).or(Some("In Stock".to_string())),
                date: None,
            })
        })
        .collect();

    if candidates.len() < MIN_STRUCTURAL_HITS {
        for anchor in scan_anchor_cards(&doc, '£', 10) {
            let Some(price) = parse_price(&anchor.text).filter(|p| *p < MAX_SANE_PRICE) else {
                continue;
            };
            let Some(title) = fallback_title(&anchor.lines, 5) else {
                continue;
            };
            candidates.push(Listing {
                source: Source::Cex,
                title,
                price,
                currency: Currency::Gbp,
                link: absolutize(&anchor.href, "https://uk.webuy.com"),
                image: first_image(anchor.el),
                condition: "Used (Refurbished)".to_string(),
                original_price: price_text(&anchor.text).unwrap_or_else(|| price.to_string()),
                location: None,
                shipping: None,
                warranty: Some("24 Month Warranty".to_string()),
                stock: Some("In Stock".to_string()),
                date: None,
            });
        }
    }

    dedupe_and_cap(candidates, MAX_LISTINGS)
}

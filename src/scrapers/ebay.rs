use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{
    clean_title, dedupe_and_cap, fallback_title, first_attr, first_image, first_text,
    joined_text, parse_price, price_text, scan_anchor_cards, sel,
};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 10;

/// Below this many structural hits the generic anchor scan kicks in.
const MIN_STRUCTURAL_HITS: usize = 2;

// Desktop and mobile card markup both appear depending on which variant
// eBay decides to serve the emulated device.
static CARD_SEL: Lazy<Selector> =
    Lazy::new(|| sel("li.s-card, .s-card, li.s-item, .s-item, .s-item__wrapper"));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| sel(".s-card__title, .s-item__title"));
static PRICE_SEL: Lazy<Selector> = Lazy::new(|| sel(".s-card__price, .s-item__price"));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| sel("a.s-item__link, a"));
static IMG_SEL: Lazy<Selector> = Lazy::new(|| sel(".s-item__image-img, .s-card__image img, img"));

/// eBay search extractor. The only source that serves both regions; uses a
/// mobile Safari profile, which skips most of the desktop bot checks.
pub struct EbayExtractor;

#[async_trait]
impl Extractor for EbayExtractor {
    fn source(&self) -> Source {
        Source::Ebay
    }

    fn search_url(&self, query: &str, location: Location) -> String {
        let domain = match location {
            Location::Uk => "ebay.co.uk",
            Location::Us => "ebay.com",
        };
        format!(
            "https://www.{domain}/sch/i.html?_nkw={}&_sop=12",
            urlencoding::encode(query)
        )
    }

    async fn extract(
        &self,
        ctx: &DeploymentContext,
        query: &str,
        location: Location,
    ) -> Result<SourceResult, ScrapeError> {
        let url = self.search_url(query, location);
        debug!(%url, "eBay search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::mobile(location),
            ready_marker: Some(".s-item__wrapper, .s-item, li.s-card, div.s-item__info"),
            settle: Duration::from_secs(5),
            scroll_passes: 2,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html, location.currency());
        info!(count = listings.len(), "eBay extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

/// Pure extraction over the rendered document: structural card selectors
/// first, generic currency-bearing anchors when the markup has shifted.
pub(crate) fn extract_listings(html: &str, currency: Currency) -> Vec<Listing> {
    collect_listings(html, currency, MAX_LISTINGS)
}

pub(crate) fn collect_listings(html: &str, currency: Currency, cap: usize) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let mut candidates: Vec<Listing> = doc
        .select(&CARD_SEL)
        .filter_map(|card| {
            let text = joined_text(card);
            listing_from_text(
                &text,
                first_text(card, &TITLE_SEL),
                first_text(card, &PRICE_SEL),
                card_link(card),
                first_attr(card, &IMG_SEL, "src").or_else(|| first_image(card)),
                currency,
            )
        })
        .collect();

    if candidates.len() < MIN_STRUCTURAL_HITS {
        debug!(
            hits = candidates.len(),
            "structural selectors came up short, scanning anchors"
        );
        for anchor in scan_anchor_cards(&doc, currency.symbol(), 25) {
            if let Some(listing) = listing_from_text(
                &anchor.text,
                None,
                None,
                Some(anchor.href.clone()),
                first_image(anchor.el),
                currency,
            ) {
                candidates.push(listing);
            }
        }
    }

    dedupe_and_cap(candidates, cap)
}

fn card_link(card: scraper::ElementRef) -> Option<String> {
    if card.value().name() == "a" {
        return card.value().attr("href").map(str::to_string);
    }
    first_attr(card, &LINK_SEL, "href")
}

fn listing_from_text(
    text: &str,
    structural_title: Option<String>,
    structural_price: Option<String>,
    link: Option<String>,
    image: Option<String>,
    currency: Currency,
) -> Option<Listing> {
    // Storefront promos share the card markup but are not listings.
    if text.contains("Shop on eBay")
        || text.contains("eBay Store")
        || text.contains("Shop by Category")
    {
        return None;
    }

    let link = link.filter(|l| !l.is_empty())?;

    let price_source = structural_price.as_deref().unwrap_or(text);
    let price = parse_price(price_source)?;

    let lines: Vec<String> = text.lines().map(str::to_string).collect();
    let title = structural_title
        .map(|t| clean_title(&t))
        .filter(|t| t.len() >= 5)
        .or_else(|| fallback_title(&lines, 5))
        .unwrap_or_else(|| "eBay Item".to_string());

    let condition = if text.to_lowercase().contains("refurbished") {
        "Refurbished"
    } else {
        "Used"
    };

    Some(Listing {
        source: Source::Ebay,
        title,
        price,
        currency,
        link,
        image,
        condition: condition.to_string(),
        original_price: price_text(price_source).unwrap_or_else(|| price.to_string()),
        location: None,
        shipping: None,
        warranty: None,
        stock: None,
        date: None,
    })
}

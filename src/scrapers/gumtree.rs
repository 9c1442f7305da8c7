use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{
    absolutize, dedupe_and_cap, fallback_title, first_attr, first_image, first_text,
    joined_text, parse_price, price_text, sel, text_lines, MAX_SANE_PRICE,
};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 10;
const MIN_STRUCTURAL_HITS: usize = 2;

// Gumtree ships build-hashed class names; the e25keea* family has been
// stable across recent deploys but the generic article tier below expects
// it to rot eventually.
static CARD_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"article[class*="e25keea24"]"#));
static LINK_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"a[class*="e25keea23"]"#));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"div[class*="e25keea19"]"#));
static LOCATION_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"div[class*="e25keea14"]"#));
static DIV_SEL: Lazy<Selector> = Lazy::new(|| sel("div"));
static SPAN_SEL: Lazy<Selector> = Lazy::new(|| sel("span"));
static ARTICLE_SEL: Lazy<Selector> = Lazy::new(|| sel("article"));
static H3_SEL: Lazy<Selector> = Lazy::new(|| sel("h3"));
static ANY_LINK_SEL: Lazy<Selector> = Lazy::new(|| sel("a"));

/// Gumtree classifieds extractor. UK only.
pub struct GumtreeExtractor;

#[async_trait]
impl Extractor for GumtreeExtractor {
    fn source(&self) -> Source {
        Source::Gumtree
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://www.gumtree.com/search?search_category=all&q={}",
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
        debug!(%url, "Gumtree search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: Some(r#"article[class*="e25keea24"]"#),
            settle: Duration::from_secs(5),
            scroll_passes: 1,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html);
        info!(count = listings.len(), "Gumtree extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let mut candidates: Vec<Listing> = doc
        .select(&CARD_SEL)
        .filter_map(|card| listing_from_card(card))
        .collect();

    // The obfuscated classes rotate on redeploys; fall back to plain
    // article scanning so the source degrades instead of going dark.
    if candidates.len() < MIN_STRUCTURAL_HITS {
        debug!("structural Gumtree selectors missed, scanning articles");
        for article in doc.select(&ARTICLE_SEL) {
            if let Some(listing) = listing_from_article(article) {
                candidates.push(listing);
            }
        }
    }

    dedupe_and_cap(candidates, MAX_LISTINGS)
}

fn listing_from_card(card: ElementRef) -> Option<Listing> {
    let link = first_attr(card, &LINK_SEL, "href")?;
    let title = first_text(card, &TITLE_SEL)?;

    // Price lives in a leaf div; any wrapper div would also contain the
    // title text.
    let price_raw = card
        .select(&DIV_SEL)
        .filter(|div| div.children().filter_map(ElementRef::wrap).next().is_none())
        .map(|div| div.text().collect::<String>())
        .find(|text| text.contains('£'))?;
    let price = parse_price(&price_raw).filter(|p| *p < MAX_SANE_PRICE)?;

    let date = card
        .select(&SPAN_SEL)
        .map(|span| span.text().collect::<String>().trim().to_string())
        .find(|text| text.contains("ago") || text.contains("Just now"))
        .or(Some("Recently".to_string()));

    Some(Listing {
        source: Source::Gumtree,
        title: title.trim().to_string(),
        price,
        currency: Currency::Gbp,
        link: absolutize(&link, "https://www.gumtree.com"),
        image: first_image(card),
        condition: "Used".to_string(),
        original_price: price_text(&price_raw).unwrap_or(price_raw.trim().to_string()),
        location: first_text(card, &LOCATION_SEL).or(Some("Unknown".to_string())),
        shipping: None,
        warranty: None,
        stock: None,
        date,
    })
}

fn listing_from_article(article: ElementRef) -> Option<Listing> {
    let text = joined_text(article);
    if !text.contains('£') {
        return None;
    }
    let price = parse_price(&text).filter(|p| *p < MAX_SANE_PRICE)?;
    let link = first_attr(article, &ANY_LINK_SEL, "href")?;
    let lines = text_lines(article);
    let title = first_text(article, &H3_SEL).or_else(|| fallback_title(&lines, 5))?;

    Some(Listing {
        source: Source::Gumtree,
        title: title.trim().to_string(),
        price,
        currency: Currency::Gbp,
        link: absolutize(&link, "https://www.gumtree.com"),
        image: first_image(article),
        condition: "Used".to_string(),
        original_price: price_text(&text).unwrap_or_else(|| price.to_string()),
        location: Some("Unknown".to_string()),
        shipping: None,
        warranty: None,
        stock: None,
        date: Some("Recently".to_string()),
    })
}

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

/// MusicMagpie store extractor. UK only. The storefront markup carries no
/// stable classes at all, so extraction is the generic anchor scan from the
/// start.
pub struct MusicMagpieExtractor;

#[async_trait]
impl Extractor for MusicMagpieExtractor {
    fn source(&self) -> Source {
        Source::MusicMagpie
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://store.musicmagpie.co.uk/store/search?q={}",
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
        debug!(%url, "MusicMagpie search");

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
        info!(count = listings.len(), "MusicMagpie extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let candidates = scan_anchor_cards(&doc, '£', 10)
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
                source: Source::MusicMagpie,
                title,
                price,
                currency: Currency::Gbp,
                link: anchor.href.clone(),
                image: first_image(anchor.el),
                condition: "Refurbished".to_string(),
                original_price: price_text(&anchor.text).unwrap_or_else(|| price.to_string()),
                location: None,
                shipping: None,
                warranty: Some("12 Month Warranty".to_string()),
                stock: Some("In Stock".to_string()),
                date: None,
            })
        })
        .collect();

    dedupe_and_cap(candidates, MAX_LISTINGS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_price_bearing_anchors() {
        let html = r#"<div>
            <a href="https://store.musicmagpie.co.uk/p/ipad-9">
              <span>Apple iPad 9 64GB WiFi</span><span>£185.99</span>
            </a>
            <a href="https://store.musicmagpie.co.uk/basket">Basket</a>
        </div>"#;
        let listings = extract_listings(html);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].title, "Apple iPad 9 64GB WiFi");
        assert_eq!(listings[0].price, 185.99);
        assert_eq!(listings[0].condition, "Refurbished");
    }

    #[test]
    fn duplicate_hrefs_collapse() {
        let html = r#"<div>
            <a href="https://store.musicmagpie.co.uk/p/1"><span>Apple iPad 9 64GB</span><span>£185.99</span></a>
            <a href="https://store.musicmagpie.co.uk/p/1"><span>Apple iPad 9 64GB promo</span><span>£185.99</span></a>
        </div>"#;
        assert_eq!(extract_listings(html).len(), 1);
    }

    #[test]
    fn gated_to_uk() {
        assert!(!MusicMagpieExtractor.supports(Location::Us));
    }
}

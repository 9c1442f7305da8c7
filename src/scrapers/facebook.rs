use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Listing, Location, Source, SourceResult};

use super::heuristics::{absolutize, dedupe_and_cap, first_image, parse_price, sel, text_lines};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_LISTINGS: usize = 15;

static ITEM_SEL: Lazy<Selector> = Lazy::new(|| sel(r#"a[href*="/marketplace/item/"]"#));

/// Facebook Marketplace extractor. Card markup is class-obfuscated, so the
/// whole extraction runs off item links and their text lines. The most
/// frequently blocked source; deployments can disable it outright.
pub struct FacebookExtractor;

#[async_trait]
impl Extractor for FacebookExtractor {
    fn source(&self) -> Source {
        Source::Facebook
    }

    fn search_url(&self, query: &str, location: Location) -> String {
        let city = match location {
            Location::Uk => "london",
            Location::Us => "nyc",
        };
        format!(
            "https://www.facebook.com/marketplace/{city}/search/?query={}",
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
        debug!(%url, "Facebook search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: Some(r#"a[href*="/marketplace/item/"]"#),
            settle: Duration::from_secs(5),
            scroll_passes: 2,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let listings = extract_listings(&page.html, location.currency());
        info!(count = listings.len(), "Facebook extraction complete");
        Ok(SourceResult::success(self.source(), url, listings))
    }
}

pub(crate) fn extract_listings(html: &str, currency: Currency) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let candidates = doc
        .select(&ITEM_SEL)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            let lines = text_lines(anchor);

            let price_line = lines.iter().find(|l| has_symbol(l))?;
            let price = parse_price(price_line)?;

            let title = lines
                .iter()
                .find(|l| l.len() > 8 && !has_symbol(l) && !l.contains('·'))
                .cloned()
                .unwrap_or_else(|| "Facebook Item".to_string());

            // Seller location sits after the price line on the card.
            let price_idx = lines.iter().position(|l| has_symbol(l)).unwrap_or(0);
            let location_text = lines
                .iter()
                .enumerate()
                .find(|(i, l)| *i > price_idx && l.len() > 3 && !has_symbol(l) && **l != title)
                .map(|(_, l)| (*l).clone());

            Some(Listing {
                source: Source::Facebook,
                title,
                price,
                currency,
                link: absolutize(href, "https://www.facebook.com"),
                image: first_image(anchor),
                condition: "Used".to_string(),
                original_price: price_line.clone(),
                location: location_text,
                shipping: None,
                warranty: None,
                stock: None,
                date: None,
            })
        })
        .collect();

    dedupe_and_cap(candidates, MAX_LISTINGS)
}

fn has_symbol(line: &str) -> bool {
    line.contains('£') || line.contains('$')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u32, title: &str, price: &str, place: &str) -> String {
        format!(
            r#"<a href="/marketplace/item/{id}/">
                 <img src="https://scontent.fbcdn.net/{id}.jpg">
                 <span>{price}</span>
                 <span>{title}</span>
                 <span>{place}</span>
               </a>"#
        )
    }

    #[test]
    fn extracts_items_with_relative_links() {
        let html = format!(
            "<div>{}{}</div>",
            item(1, "iPad Pro 11 inch 2021", "£350", "London"),
            item(2, "iPad Air barely used", "£220", "Croydon"),
        );
        let listings = extract_listings(&html, Currency::Gbp);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].link, "https://www.facebook.com/marketplace/item/1/");
        assert_eq!(listings[0].price, 350.0);
        assert_eq!(listings[0].title, "iPad Pro 11 inch 2021");
        assert_eq!(listings[0].location.as_deref(), Some("London"));
    }

    #[test]
    fn items_without_price_are_dropped() {
        let html = format!(
            r#"<div><a href="/marketplace/item/3/"><span>Free iPad stand pickup only</span></a>{}</div>"#,
            item(4, "iPad mini 5 with box", "£180", "Leeds"),
        );
        let listings = extract_listings(&html, Currency::Gbp);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price, 180.0);
    }

    #[test]
    fn non_marketplace_links_are_ignored() {
        let html = r#"<a href="/groups/123/"><span>iPad group chat £100 bargains</span></a>"#;
        assert!(extract_listings(html, Currency::Gbp).is_empty());
    }

    #[test]
    fn search_url_uses_city_slug() {
        let ex = FacebookExtractor;
        assert_eq!(
            ex.search_url("ipad", Location::Uk),
            "https://www.facebook.com/marketplace/london/search/?query=ipad"
        );
        assert!(ex.search_url("ipad", Location::Us).contains("/nyc/"));
    }
}

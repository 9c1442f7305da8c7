use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{CashOffer, Currency, Location, Source, SourceResult};

use super::heuristics::{first_image, first_text, joined_text, parse_price, sel};
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const MAX_OFFERS: usize = 25;

static CARD_SEL: Lazy<Selector> = Lazy::new(|| sel(".wrapper-box"));
static FALLBACK_CARD_SEL: Lazy<Selector> =
    Lazy::new(|| sel(r#".cx-card-product, div[class*="product"]"#));
static TITLE_SEL: Lazy<Selector> = Lazy::new(|| sel(".line-clamp, h3"));
static CASH_PRICE_SEL: Lazy<Selector> = Lazy::new(|| sel(".cash-price"));

/// "Cash £123" label used on cards that lack the dedicated price element.
static CASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)cash[:\s]+£\s?([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap());

/// CeX sell-side extractor: what the chain pays for the device, not what
/// it sells for. Produces cash offers only; the orchestrator folds them
/// into the resale price band.
pub struct CexSellExtractor;

#[async_trait]
impl Extractor for CexSellExtractor {
    fn source(&self) -> Source {
        Source::CexSell
    }

    fn supports(&self, location: Location) -> bool {
        location == Location::Uk
    }

    fn search_url(&self, query: &str, _location: Location) -> String {
        format!(
            "https://uk.webuy.com/sell/search?stext={}",
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
        debug!(%url, "CeX sell search");

        let plan = NavPlan {
            url: url.clone(),
            profile: StealthProfile::desktop(location),
            ready_marker: Some(".wrapper-box, .cash-price, .cx-card-product"),
            settle: Duration::from_secs(5),
            scroll_passes: 0,
            nav_timeout: Duration::from_secs(45),
        };

        let page = match load_search_page(self.source(), ctx, plan).await? {
            PageOutcome::Page(page) => page,
            PageOutcome::Blocked(result) => return Ok(result),
        };

        let offers = extract_offers(&page.html);
        info!(count = offers.len(), "CeX sell extraction complete");
        Ok(SourceResult::offers(self.source(), url, offers))
    }
}

pub(crate) fn extract_offers(html: &str) -> Vec<CashOffer> {
    let doc = Html::parse_document(html);

    let mut offers: Vec<CashOffer> = doc
        .select(&CARD_SEL)
        .filter_map(offer_from_card)
        .collect();

    if offers.is_empty() {
        offers = doc
            .select(&FALLBACK_CARD_SEL)
            .filter_map(offer_from_card)
            .collect();
    }

    offers.truncate(MAX_OFFERS);
    offers
}

fn offer_from_card(card: ElementRef) -> Option<CashOffer> {
    let title = first_text(card, &TITLE_SEL)?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let cash_price = match first_text(card, &CASH_PRICE_SEL) {
        Some(price_raw) => parse_price(&price_raw),
        None => {
            let text = joined_text(card);
            CASH_RE
                .captures(&text)
                .and_then(|caps| caps[1].replace(',', "").parse::<f64>().ok())
                .filter(|p| p.is_finite() && *p > 0.0)
        }
    }?;

    Some(CashOffer {
        title,
        cash_price,
        currency: Currency::Gbp,
        image: first_image(card),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_cash_prices_from_sell_cards() {
        let html = r#"<div>
            <div class="wrapper-box">
              <div class="line-clamp">iPad 9th Gen 64GB A Grade</div>
              <span class="cash-price">£120.00</span>
            </div>
            <div class="wrapper-box">
              <div class="line-clamp">iPad 9th Gen 64GB B Grade</div>
              <span class="cash-price">£95.00</span>
            </div>
        </div>"#;
        let offers = extract_offers(html);
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].cash_price, 120.0);
        assert_eq!(offers[1].cash_price, 95.0);
    }

    #[test]
    fn falls_back_to_cash_label_pattern() {
        let html = r#"<div class="cx-card-product">
            <h3>iPad Air 2 16GB</h3>
            <p>We pay Cash: £48.00 or voucher £60.00</p>
        </div>"#;
        let offers = extract_offers(html);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].cash_price, 48.0);
    }

    #[test]
    fn cards_without_cash_price_are_dropped() {
        let html = r#"<div class="wrapper-box">
            <div class="line-clamp">iPad out of range</div>
            <span class="cash-voucher">£60.00</span>
        </div>"#;
        assert!(extract_offers(html).is_empty());
    }

    #[test]
    fn gated_to_uk() {
        assert!(!CexSellExtractor.supports(Location::Us));
    }
}

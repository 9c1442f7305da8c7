use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Currency, Location, PopularProduct, Source};

use super::ebay::{self, EbayExtractor};
use super::heuristics::canonical_title;
use super::navigate::{load_search_page, NavPlan, PageOutcome};
use super::stealth::StealthProfile;
use super::traits::Extractor;

const TITLE_WORDS: usize = 6;

/// Lighter-weight variant extraction: scan one marketplace's top results
/// and boil the titles down to short canonical product names. Feeds the
/// popular-products surface, not the comparison view.
pub async fn popular_products(
    ctx: &DeploymentContext,
    query: &str,
    location: Location,
    count: usize,
) -> Result<Vec<PopularProduct>, ScrapeError> {
    let ebay = EbayExtractor;
    let url = ebay.search_url(query, location);
    debug!(%url, "popular products scan");

    let plan = NavPlan {
        url: url.clone(),
        profile: StealthProfile::mobile(location),
        ready_marker: Some(".s-item__wrapper, .s-item, li.s-card"),
        settle: Duration::from_secs(5),
        scroll_passes: 2,
        nav_timeout: Duration::from_secs(45),
    };

    let page = match load_search_page(Source::Ebay, ctx, plan).await? {
        PageOutcome::Page(page) => page,
        PageOutcome::Blocked(result) => {
            return Err(ScrapeError::Navigation(
                result.error.unwrap_or_else(|| "extraction blocked".to_string()),
            ))
        }
    };

    let products = popular_from_html(&page.html, location.currency(), count);
    info!(count = products.len(), "popular products scan complete");
    Ok(products)
}

/// Pure title canonicalization over a rendered results page.
pub(crate) fn popular_from_html(
    html: &str,
    currency: Currency,
    count: usize,
) -> Vec<PopularProduct> {
    // Over-collect, then dedupe down to canonical names.
    let listings = ebay::collect_listings(html, currency, count.saturating_mul(3).max(30));

    let mut seen: HashSet<String> = HashSet::new();
    let mut products = Vec::new();
    for listing in listings {
        let title = canonical_title(&listing.title, TITLE_WORDS);
        if title.len() < 4 {
            continue;
        }
        if seen.insert(title.to_lowercase()) {
            products.push(PopularProduct {
                title,
                image: listing.image,
            });
            if products.len() == count {
                break;
            }
        }
    }
    products
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: u32, title: &str, price: &str) -> String {
        format!(
            r#"<li class="s-item">
                 <a class="s-item__link" href="https://www.ebay.co.uk/itm/{id}">
                   <div class="s-item__title">{title}</div>
                   <span class="s-item__price">{price}</span>
                 </a>
               </li>"#
        )
    }

    #[test]
    fn canonicalizes_and_dedupes_titles() {
        let html = format!(
            "<ul>{}{}{}</ul>",
            card(1, "Apple iPad Pro 11 (2021) - 128GB Space Grey", "£450"),
            card(2, "Apple iPad Pro 11 (2021) - 256GB Silver", "£520"),
            card(3, "Apple iPad mini 6 64GB WiFi", "£300"),
        );
        let products = popular_from_html(&html, Currency::Gbp, 10);
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].title, "Apple iPad Pro 11");
        assert_eq!(products[1].title, "Apple iPad mini 6 64GB WiFi");
    }

    #[test]
    fn respects_requested_count() {
        let html = format!(
            "<ul>{}{}{}</ul>",
            card(1, "Apple iPad Pro first model", "£450"),
            card(2, "Apple iPhone 13 second model", "£520"),
            card(3, "Apple Watch SE third model", "£150"),
        );
        let products = popular_from_html(&html, Currency::Gbp, 2);
        assert_eq!(products.len(), 2);
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Marketplace a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "eBay")]
    Ebay,
    Facebook,
    #[serde(rename = "CeX")]
    Cex,
    Gumtree,
    BackMarket,
    MusicMagpie,
    CashConverters,
    #[serde(rename = "CeXSell")]
    CexSell,
}

impl Source {
    pub const ALL: [Source; 8] = [
        Source::Ebay,
        Source::Cex,
        Source::Gumtree,
        Source::Facebook,
        Source::BackMarket,
        Source::MusicMagpie,
        Source::CashConverters,
        Source::CexSell,
    ];

    /// Stable lowercase identifier used in query strings and diagnostics.
    pub fn id(&self) -> &'static str {
        match self {
            Source::Ebay => "ebay",
            Source::Facebook => "facebook",
            Source::Cex => "cex",
            Source::Gumtree => "gumtree",
            Source::BackMarket => "backmarket",
            Source::MusicMagpie => "musicmagpie",
            Source::CashConverters => "cashconverters",
            Source::CexSell => "cexsell",
        }
    }

    /// Display name matching the marketplace's own branding.
    pub fn label(&self) -> &'static str {
        match self {
            Source::Ebay => "eBay",
            Source::Facebook => "Facebook",
            Source::Cex => "CeX",
            Source::Gumtree => "Gumtree",
            Source::BackMarket => "BackMarket",
            Source::MusicMagpie => "MusicMagpie",
            Source::CashConverters => "CashConverters",
            Source::CexSell => "CeXSell",
        }
    }

    pub fn from_id(id: &str) -> Option<Source> {
        let id = id.to_lowercase();
        Source::ALL.iter().copied().find(|s| s.id() == id)
    }
}

/// Search region. Drives marketplace domains, locale and currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "UK")]
    Uk,
}

impl Location {
    pub fn parse(value: &str) -> Location {
        if value.eq_ignore_ascii_case("uk") {
            Location::Uk
        } else {
            Location::Us
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Location::Us => "US",
            Location::Uk => "UK",
        }
    }

    /// Currency follows the region, never the page text.
    pub fn currency(&self) -> Currency {
        match self {
            Location::Us => Currency::Usd,
            Location::Uk => Currency::Gbp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "GBP")]
    Gbp,
}

impl Currency {
    pub fn symbol(&self) -> char {
        match self {
            Currency::Usd => '$',
            Currency::Gbp => '£',
        }
    }
}

/// One normalized marketplace search result.
///
/// `price` is guaranteed finite and positive by the extraction layer;
/// candidates that fail to parse never become listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub source: Source,
    pub title: String,
    pub price: f64,
    pub currency: Currency,
    pub link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub condition: String,
    /// Raw price text as shown on the page.
    pub original_price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warranty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// A sell-to-retailer quote from the CeX sell side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashOffer {
    pub title: String,
    pub cash_price: f64,
    pub currency: Currency,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of one extractor invocation. Created fresh per run and never
/// mutated after return.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub source: Source,
    pub status: SourceStatus,
    pub listings: Vec<Listing>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cash_offers: Vec<CashOffer>,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceResult {
    pub fn success(source: Source, source_url: String, listings: Vec<Listing>) -> Self {
        Self {
            source,
            status: SourceStatus::Success,
            listings,
            cash_offers: Vec::new(),
            source_url,
            error: None,
        }
    }

    pub fn offers(source: Source, source_url: String, cash_offers: Vec<CashOffer>) -> Self {
        Self {
            source,
            status: SourceStatus::Success,
            listings: Vec::new(),
            cash_offers,
            source_url,
            error: None,
        }
    }

    pub fn skipped(source: Source) -> Self {
        Self {
            source,
            status: SourceStatus::Skipped,
            listings: Vec::new(),
            cash_offers: Vec::new(),
            source_url: String::new(),
            error: None,
        }
    }

    pub fn errored(source: Source, source_url: String, message: impl ToString) -> Self {
        Self {
            source,
            status: SourceStatus::Error,
            listings: Vec::new(),
            cash_offers: Vec::new(),
            source_url,
            error: Some(message.to_string()),
        }
    }
}

/// One validated comparison request. Immutable per invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub location: Location,
    pub source: Option<Source>,
}

impl SearchRequest {
    pub fn new(
        query: &str,
        location: Location,
        source_id: Option<&str>,
    ) -> Result<Self, RequestError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        let source = match source_id {
            Some(id) => Some(
                Source::from_id(id).ok_or_else(|| RequestError::UnknownSource(id.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            query: query.to_string(),
            location,
            source,
        })
    }
}

/// Per-source status line for the debug payload, in invocation order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDiagnostic {
    pub name: &'static str,
    pub id: &'static str,
    pub status: SourceStatus,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub total_time_ms: u64,
    pub per_source_status: Vec<SourceDiagnostic>,
}

/// Combined payload returned to the caller. Stateless; nothing survives
/// past the request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResponse {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub combined_listings: Vec<Listing>,
    pub per_source_urls: BTreeMap<&'static str, String>,
    pub cex_cash_price_low: f64,
    pub cex_cash_price_high: f64,
    pub debug: DebugReport,
}

/// Candidate product name for the popular-products surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularProduct {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_round_trip() {
        for source in Source::ALL {
            assert_eq!(Source::from_id(source.id()), Some(source));
        }
        assert_eq!(Source::from_id("CeXSell"), Some(Source::CexSell));
        assert_eq!(Source::from_id("invalid-id"), None);
    }

    #[test]
    fn location_parse_defaults_to_us() {
        assert_eq!(Location::parse("UK"), Location::Uk);
        assert_eq!(Location::parse("uk"), Location::Uk);
        assert_eq!(Location::parse("US"), Location::Us);
        assert_eq!(Location::parse("anything"), Location::Us);
    }

    #[test]
    fn currency_follows_location() {
        assert_eq!(Location::Uk.currency(), Currency::Gbp);
        assert_eq!(Location::Us.currency(), Currency::Usd);
    }

    #[test]
    fn request_rejects_empty_query() {
        assert_eq!(
            SearchRequest::new("  ", Location::Uk, None).unwrap_err(),
            RequestError::EmptyQuery
        );
    }

    #[test]
    fn request_rejects_unknown_source() {
        let err = SearchRequest::new("ipad", Location::Uk, Some("invalid-id")).unwrap_err();
        assert_eq!(err, RequestError::UnknownSource("invalid-id".to_string()));
    }

    #[test]
    fn request_accepts_known_source() {
        let req = SearchRequest::new("ipad", Location::Uk, Some("ebay")).unwrap();
        assert_eq!(req.source, Some(Source::Ebay));
    }

    #[test]
    fn listing_serializes_camel_case() {
        let listing = Listing {
            source: Source::Ebay,
            title: "iPad Pro".into(),
            price: 150.0,
            currency: Currency::Gbp,
            link: "https://example.com/1".into(),
            image: None,
            condition: "Used".into(),
            original_price: "£150.00".into(),
            location: None,
            shipping: None,
            warranty: None,
            stock: None,
            date: None,
        };
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["source"], "eBay");
        assert_eq!(json["originalPrice"], "£150.00");
        assert_eq!(json["currency"], "GBP");
        assert!(json.get("image").is_none());
    }
}

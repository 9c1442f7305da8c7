use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::Listing;

/// First currency-prefixed numeric token, thousands separators tolerated.
static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[£$]\s?([0-9][0-9,]*(?:\.[0-9]{1,2})?)").unwrap());

static BRACKETS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\[[^\]]*\]").unwrap());

static ANCHOR_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

/// Listings above this are treated as extraction noise, not real offers.
pub const MAX_SANE_PRICE: f64 = 100_000.0;

pub fn sel(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

/// Parse the first currency-bearing token in `text` into a positive finite
/// price. Anything else (no token, zero, NaN garbage) is `None` and the
/// candidate is dropped.
pub fn parse_price(text: &str) -> Option<f64> {
    let caps = PRICE_RE.captures(text)?;
    let value: f64 = caps[1].replace(',', "").parse().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Raw price token as shown on the page, for the `originalPrice` field.
pub fn price_text(text: &str) -> Option<String> {
    PRICE_RE.find(text).map(|m| m.as_str().to_string())
}

/// Strip marketplace boilerplate from a title: the eBay screen-reader
/// suffix, bracketed annotations, and shouty marketing prefixes.
pub fn clean_title(raw: &str) -> String {
    let without_suffix = raw.replace("Opens in a new window or tab", "");
    let without_brackets = BRACKETS_RE.replace_all(&without_suffix, "");
    let mut title = without_brackets.trim();
    for prefix in ["New listing", "NEW LISTING", "SPONSORED", "NEW", "SEALED"] {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.trim_start_matches([':', '-', ' ', '!']);
        }
    }
    title.trim().to_string()
}

/// Visible text of an element, one entry per text node.
pub fn text_lines(el: ElementRef) -> Vec<String> {
    el.text()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn joined_text(el: ElementRef) -> String {
    text_lines(el).join("\n")
}

/// Longest line that is long enough and carries no price token. Used when
/// the structural title element is missing or too short.
pub fn fallback_title(lines: &[String], min_len: usize) -> Option<String> {
    lines
        .iter()
        .filter(|l| l.len() > min_len && !l.contains('£') && !l.contains('$'))
        .max_by_key(|l| l.len())
        .map(|l| clean_title(l))
}

pub fn first_text(el: ElementRef, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|t| {
            t.text()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| !text.is_empty())
}

pub fn first_attr(el: ElementRef, selector: &Selector, attr: &str) -> Option<String> {
    el.select(selector)
        .find_map(|node| node.value().attr(attr).map(str::to_string))
}

/// First `<img>` URL inside the element, tolerating lazy-load attributes.
pub fn first_image(el: ElementRef) -> Option<String> {
    el.select(&IMG_SEL).find_map(|img| {
        img.value()
            .attr("src")
            .or_else(|| img.value().attr("data-src"))
            .map(str::to_string)
    })
}

pub fn absolutize(href: &str, base: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{base}{href}")
    }
}

/// A link element that looks like a product card: carries the expected
/// currency symbol and enough text to be a real listing. This is the
/// generic tier that keeps extraction alive when structural selectors rot.
pub struct AnchorCard<'a> {
    pub el: ElementRef<'a>,
    pub href: String,
    pub text: String,
    pub lines: Vec<String>,
}

pub fn scan_anchor_cards<'a>(
    doc: &'a Html,
    symbol: char,
    min_len: usize,
) -> Vec<AnchorCard<'a>> {
    doc.select(&ANCHOR_SEL)
        .filter_map(|el| {
            let lines = text_lines(el);
            let text = lines.join("\n");
            if !text.contains(symbol) || text.len() <= min_len {
                return None;
            }
            let href = el.value().attr("href")?.to_string();
            Some(AnchorCard {
                el,
                href,
                text,
                lines,
            })
        })
        .collect()
}

/// Collapse candidates sharing a link, keeping the first occurrence, and
/// cap the result to bound payload size.
pub fn dedupe_and_cap(listings: Vec<Listing>, cap: usize) -> Vec<Listing> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for listing in listings {
        if seen.insert(listing.link.clone()) {
            out.push(listing);
            if out.len() == cap {
                break;
            }
        }
    }
    out
}

/// Shorten a raw listing title to a canonical product name for the popular
/// products surface: cleanup, cut at the first separator, keep a handful of
/// words.
pub fn canonical_title(raw: &str, max_words: usize) -> String {
    let cleaned = clean_title(raw);
    let cut = cleaned
        .split(['-', '–', '|', ',', '('])
        .next()
        .unwrap_or(&cleaned);
    cut.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

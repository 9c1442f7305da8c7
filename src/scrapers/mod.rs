pub mod backmarket;
pub mod browser;
pub mod cashconverters;
pub mod cex;
pub mod cex_sell;
pub mod ebay;
pub mod facebook;
pub mod gumtree;
mod heuristics;
pub mod musicmagpie;
pub mod navigate;
pub mod popular;
pub mod stealth;
pub mod traits;

pub use traits::Extractor;

use backmarket::BackMarketExtractor;
use cashconverters::CashConvertersExtractor;
use cex::CexExtractor;
use cex_sell::CexSellExtractor;
use ebay::EbayExtractor;
use facebook::FacebookExtractor;
use gumtree::GumtreeExtractor;
use musicmagpie::MusicMagpieExtractor;

/// The full extractor set, in the order diagnostics are reported.
pub fn all_extractors() -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(EbayExtractor),
        Box::new(CexExtractor),
        Box::new(GumtreeExtractor),
        Box::new(FacebookExtractor),
        Box::new(BackMarketExtractor),
        Box::new(MusicMagpieExtractor),
        Box::new(CashConvertersExtractor),
        Box::new(CexSellExtractor),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Source;

    #[test]
    fn registry_covers_every_source_once() {
        let extractors = all_extractors();
        assert_eq!(extractors.len(), Source::ALL.len());
        for (extractor, source) in extractors.iter().zip(Source::ALL) {
            assert_eq!(extractor.source(), source);
        }
    }
}

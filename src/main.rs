use price_scout::models::{Location, SearchRequest};
use price_scout::{DeploymentContext, Orchestrator};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let query = match args.next() {
        Some(query) => query,
        None => {
            eprintln!("usage: price-scout <query> [US|UK] [source-id]");
            std::process::exit(2);
        }
    };
    let location = Location::parse(&args.next().unwrap_or_else(|| "US".to_string()));
    let source = args.next();

    let request = SearchRequest::new(&query, location, source.as_deref())?;
    let ctx = DeploymentContext::from_env();

    info!("🔎 Price Scout - second-hand marketplace comparison");
    info!("Searching \"{}\" in {}", request.query, location.code());
    info!("");

    let orchestrator = Orchestrator::new(ctx);
    let response = orchestrator.compare(&request).await;

    info!("\n✅ {} listings collected\n", response.combined_listings.len());

    for (i, listing) in response.combined_listings.iter().enumerate() {
        println!(
            "{}. {} ({}{:.2})",
            i + 1,
            listing.title,
            listing.currency.symbol(),
            listing.price
        );
        println!("   {} · {}", listing.source.label(), listing.condition);
        println!("   {}", listing.link);
        println!();
    }

    println!("Per-source status:");
    for status in &response.debug.per_source_status {
        match &status.error {
            Some(error) => println!("   {:15} {:?} ({})", status.name, status.status, error),
            None => println!("   {:15} {:?} ({} items)", status.name, status.status, status.count),
        }
    }

    if response.cex_cash_price_high > 0.0 {
        info!(
            "💰 CeX would pay £{:.2} - £{:.2} for this item",
            response.cex_cash_price_low, response.cex_cash_price_high
        );
    }

    // Save the full payload for inspection
    let json = serde_json::to_string_pretty(&response)?;
    tokio::fs::write("comparison.json", json).await?;
    info!("💾 Saved full response to comparison.json");

    Ok(())
}

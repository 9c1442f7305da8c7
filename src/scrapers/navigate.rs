use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DeploymentContext;
use crate::error::ScrapeError;
use crate::models::{Source, SourceResult};

use super::browser::BrowserSession;
use super::stealth::StealthProfile;

/// How one extractor wants its search page loaded.
pub struct NavPlan {
    pub url: String,
    pub profile: StealthProfile,
    /// CSS selector signalling that results have materialized. When absent,
    /// the settle delay alone decides readiness.
    pub ready_marker: Option<&'static str>,
    /// Upper bound on waiting for the marker, and the plain delay when no
    /// marker is given.
    pub settle: Duration,
    /// Scroll passes to trigger lazy-loaded cards.
    pub scroll_passes: u32,
    /// Hard wall-clock budget for the whole navigation, browser launch
    /// included.
    pub nav_timeout: Duration,
}

/// Snapshot of a rendered search page.
pub struct RenderedPage {
    pub html: String,
    pub title: String,
    pub final_url: String,
}

/// Either a usable page, or the error-status result the extractor should
/// hand back unchanged.
pub enum PageOutcome {
    Page(RenderedPage),
    Blocked(SourceResult),
}

/// Load a search page under the plan's budget and classify the outcome.
///
/// Browser-acquisition failures propagate as `Err`; every other failure is
/// folded into an error result that still carries the search URL so the
/// caller can deep-link the user to the marketplace.
pub async fn load_search_page(
    source: Source,
    ctx: &DeploymentContext,
    plan: NavPlan,
) -> Result<PageOutcome, ScrapeError> {
    let url = plan.url.clone();
    match fetch_rendered(ctx, plan).await {
        Ok(page) => {
            if let Some(reason) = detect_bot_wall(&page.title, &page.final_url) {
                warn!(source = source.label(), %reason, "bot wall detected");
                return Ok(PageOutcome::Blocked(SourceResult::errored(
                    source,
                    url,
                    ScrapeError::BotWall(reason),
                )));
            }
            Ok(PageOutcome::Page(page))
        }
        Err(e) if e.is_browser_acquisition() => Err(e),
        Err(e) => {
            warn!(source = source.label(), error = %e, "scrape failed");
            Ok(PageOutcome::Blocked(SourceResult::errored(source, url, e)))
        }
    }
}

/// Drive a full navigation on the blocking pool under a hard timeout.
async fn fetch_rendered(
    ctx: &DeploymentContext,
    plan: NavPlan,
) -> Result<RenderedPage, ScrapeError> {
    let ctx = ctx.clone();
    let budget = plan.nav_timeout;
    let handle = tokio::task::spawn_blocking(move || render_page(&ctx, &plan));
    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => Err(ScrapeError::Navigation(join_err.to_string())),
        Err(_) => Err(ScrapeError::NavigationTimeout(budget)),
    }
}

fn render_page(ctx: &DeploymentContext, plan: &NavPlan) -> Result<RenderedPage, ScrapeError> {
    let session = BrowserSession::acquire(ctx, &plan.profile)?;
    let tab = session.tab();

    let nav_err = |e: anyhow::Error| ScrapeError::Navigation(e.to_string());

    tab.set_default_timeout(plan.nav_timeout);
    tab.navigate_to(&plan.url).map_err(nav_err)?;
    tab.wait_until_navigated().map_err(nav_err)?;

    // Wait for the results marker, but never past the settle budget; a page
    // without the marker still gets scanned by the generic heuristics.
    match plan.ready_marker {
        Some(marker) => {
            if tab
                .wait_for_element_with_custom_timeout(marker, plan.settle)
                .is_err()
            {
                debug!(marker, "ready marker not seen, continuing after settle");
            }
        }
        None => thread::sleep(plan.settle),
    }

    for _ in 0..plan.scroll_passes {
        let _ = tab.evaluate("window.scrollBy(0, 800)", false);
        thread::sleep(Duration::from_millis(500));
    }

    let html = tab.get_content().map_err(nav_err)?;
    let title = tab.get_title().unwrap_or_default();
    let final_url = tab.get_url();

    debug!(bytes = html.len(), %final_url, "page captured");

    Ok(RenderedPage {
        html,
        title,
        final_url,
    })
}

/// Recognize challenge pages and login redirects from the page title or the
/// URL we ended up on.
pub fn detect_bot_wall(title: &str, final_url: &str) -> Option<String> {
    const TITLE_MARKERS: [&str; 6] = [
        "Attention Required",
        "Checking your browser",
        "Just a moment",
        "Access Denied",
        "Robot or human",
        "Security Measure",
    ];
    for marker in TITLE_MARKERS {
        if title.contains(marker) {
            return Some(format!("challenge page: {title}"));
        }
    }

    let lower = final_url.to_lowercase();
    for marker in ["/login", "/captcha", "/challenge", "/interstitial"] {
        if lower.contains(marker) {
            return Some(format!("redirected to {final_url}"));
        }
    }

    None
}

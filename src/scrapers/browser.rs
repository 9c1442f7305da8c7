use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::{DeploymentContext, RuntimeEnv};
use crate::error::{should_retry_launch, ScrapeError, LAUNCH_RETRY_BACKOFF};

use super::stealth::{self, StealthProfile};

/// Kill the Chrome process if a tab hangs longer than this.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

/// One headless browser process plus a single stealth-configured tab.
///
/// Every extractor invocation acquires its own session, so nothing is shared
/// between sibling extractions; the orchestrator bounds how many sessions
/// are alive at once. Dropping the session closes the process on every exit
/// path, including panics on the blocking pool.
pub struct BrowserSession {
    // Owns the Chrome subprocess; kept alive for the lifetime of `tab`.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    /// Launch a browser and open a tab with the profile applied.
    pub fn acquire(
        ctx: &DeploymentContext,
        profile: &StealthProfile,
    ) -> Result<Self, ScrapeError> {
        let browser = launch_with_retry(ctx, profile)?;
        let tab = browser
            .new_tab()
            .map_err(|e| ScrapeError::BrowserAcquisition(e.to_string()))?;

        stealth::apply(&tab, profile).map_err(|e| ScrapeError::Navigation(e.to_string()))?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

/// Launch with a bounded retry loop. Only the transient spawn-failure class
/// is retried; anything else (missing binary, bad path) fails the
/// acquisition immediately.
fn launch_with_retry(
    ctx: &DeploymentContext,
    profile: &StealthProfile,
) -> Result<Browser, ScrapeError> {
    let mut attempt = 1;
    loop {
        match Browser::new(launch_options(ctx, profile)?) {
            Ok(browser) => {
                debug!(attempt, "headless browser launched");
                return Ok(browser);
            }
            Err(e) => {
                let message = e.to_string();
                if should_retry_launch(&message, attempt) {
                    warn!(attempt, %message, "transient launch failure, retrying");
                    thread::sleep(LAUNCH_RETRY_BACKOFF);
                    attempt += 1;
                } else {
                    return Err(ScrapeError::BrowserAcquisition(message));
                }
            }
        }
    }
}

fn launch_options(
    ctx: &DeploymentContext,
    profile: &StealthProfile,
) -> Result<LaunchOptions<'static>, ScrapeError> {
    let mut args: Vec<&OsStr> = vec![
        OsStr::new("--disable-gpu"),
        OsStr::new("--disable-dev-shm-usage"),
        OsStr::new("--disable-extensions"),
        OsStr::new("--disable-background-networking"),
        OsStr::new("--no-first-run"),
        OsStr::new("--hide-scrollbars"),
        OsStr::new("--mute-audio"),
    ];
    if ctx.runtime == RuntimeEnv::Serverless {
        args.push(OsStr::new("--disable-setuid-sandbox"));
    }

    let mut builder = LaunchOptions::default_builder();
    builder
        .headless(true)
        .window_size(Some(profile.viewport))
        .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
        .args(args);

    // Constrained containers run a provisioned chromium without a sandbox;
    // locally headless_chrome discovers the installed browser itself.
    if ctx.runtime == RuntimeEnv::Serverless {
        builder.sandbox(false);
    }
    if let Some(path) = &ctx.chrome_executable {
        info!(path = %path.display(), "using provisioned browser binary");
        builder.path(Some(path.clone()));
    }

    builder
        .build()
        .map_err(|e| ScrapeError::BrowserAcquisition(e.to_string()))
}

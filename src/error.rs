use std::time::Duration;

use thiserror::Error;

/// Failure classes produced while scraping one marketplace.
///
/// Everything except `BrowserAcquisition` is recovered locally into an
/// error-status `SourceResult`; a missing browser runtime affects every
/// extractor, so that class is surfaced to the orchestrator instead.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser acquisition failed: {0}")]
    BrowserAcquisition(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("bot wall detected: {0}")]
    BotWall(String),

    #[error("agent request failed: {0}")]
    UpstreamAgent(String),
}

impl ScrapeError {
    /// Whether this error means the runtime has no usable browser at all,
    /// as opposed to one site misbehaving.
    pub fn is_browser_acquisition(&self) -> bool {
        matches!(self, ScrapeError::BrowserAcquisition(_))
    }
}

/// Malformed client input. The HTTP boundary maps these to 400.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("query parameter is required")]
    EmptyQuery,

    #[error("invalid source: {0}")]
    UnknownSource(String),
}

/// Maximum browser launch attempts before giving up.
pub const MAX_LAUNCH_ATTEMPTS: u32 = 3;

/// Fixed pause between launch attempts.
pub const LAUNCH_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Transient spawn failures worth retrying: the kernel refused to fork or
/// the launch was interrupted mid-flight. Configuration problems (missing
/// binary, bad path) never resolve themselves and fail immediately.
fn is_transient_launch_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("resource temporarily unavailable")
        || lower.contains("cannot allocate memory")
        || lower.contains("interrupted system call")
        || lower.contains("eagain")
        || lower.contains("eintr")
        || lower.contains("spawn efault")
}

/// Retry decision for a failed browser launch.
pub fn should_retry_launch(message: &str, attempt: u32) -> bool {
    attempt < MAX_LAUNCH_ATTEMPTS && is_transient_launch_error(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retries_resource_exhaustion() {
        assert!(should_retry_launch(
            "failed to spawn: Resource temporarily unavailable (os error 11)",
            1
        ));
        assert!(should_retry_launch("spawn EFAULT", 2));
    }

    #[test]
    fn does_not_retry_missing_binary() {
        assert!(!should_retry_launch(
            "Could not auto detect a chrome executable",
            1
        ));
        assert!(!should_retry_launch("No such file or directory", 1));
    }

    #[test]
    fn respects_attempt_ceiling() {
        assert!(!should_retry_launch(
            "Resource temporarily unavailable",
            MAX_LAUNCH_ATTEMPTS
        ));
    }

    #[test]
    fn acquisition_class_is_distinguished() {
        let err = ScrapeError::BrowserAcquisition("no chrome".into());
        assert!(err.is_browser_acquisition());
        let err = ScrapeError::Navigation("net::ERR_TIMED_OUT".into());
        assert!(!err.is_browser_acquisition());
    }
}

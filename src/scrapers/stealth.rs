use anyhow::{Context, Result};
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::Tab;

use crate::models::Location;

/// Device emulation and anti-detection settings applied to every new tab.
/// Values are configuration data; the marketplace extractors pick a preset
/// per site (eBay responds better to a mobile profile, everything else gets
/// desktop).
#[derive(Debug, Clone)]
pub struct StealthProfile {
    pub user_agent: &'static str,
    pub platform: &'static str,
    pub accept_language: &'static str,
    pub viewport: (u32, u32),
    pub touch: bool,
    pub locale: &'static str,
    pub timezone: &'static str,
}

const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Mobile/15E148 Safari/604.1";

impl StealthProfile {
    pub fn desktop(location: Location) -> Self {
        let (locale, timezone, accept_language) = regional(location);
        Self {
            user_agent: DESKTOP_UA,
            platform: "MacIntel",
            accept_language,
            viewport: (1440, 900),
            touch: false,
            locale,
            timezone,
        }
    }

    pub fn mobile(location: Location) -> Self {
        let (locale, timezone, accept_language) = regional(location);
        Self {
            user_agent: MOBILE_UA,
            platform: "iPhone",
            accept_language,
            viewport: (390, 844),
            touch: true,
            locale,
            timezone,
        }
    }
}

fn regional(location: Location) -> (&'static str, &'static str, &'static str) {
    match location {
        Location::Uk => ("en-GB", "Europe/London", "en-GB,en"),
        Location::Us => ("en-US", "America/New_York", "en-US,en"),
    }
}

/// Injected before any site script runs. Masks the automation flag,
/// normalizes navigator properties, and adds noise to canvas reads and the
/// WebGL vendor strings that fingerprinting scripts key on.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });

const originalGetContext = HTMLCanvasElement.prototype.getContext;
HTMLCanvasElement.prototype.getContext = function (type) {
    const context = originalGetContext.apply(this, arguments);
    if (type === '2d' && context) {
        const originalGetImageData = context.getImageData;
        context.getImageData = function () {
            const imageData = originalGetImageData.apply(this, arguments);
            if (imageData && imageData.data) {
                imageData.data[0] = imageData.data[0] + (Math.random() > 0.5 ? 1 : -1);
            }
            return imageData;
        };
    }
    return context;
};

Object.defineProperty(navigator, 'plugins', {
    get: () => [
        { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
        { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }
    ]
});

const getParameter = WebGLRenderingContext.prototype.getParameter;
WebGLRenderingContext.prototype.getParameter = function (parameter) {
    if (parameter === 37445) return 'Intel Open Source Technology Center';
    if (parameter === 37446) return 'Mesa DRI Intel(R) HD Graphics 5500 (Broadwell GT2)';
    return getParameter.apply(this, arguments);
};

Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = { runtime: {} };
"#;

/// Apply a profile to a fresh tab before navigation.
pub fn apply(tab: &Tab, profile: &StealthProfile) -> Result<()> {
    tab.set_user_agent(
        profile.user_agent,
        Some(profile.accept_language),
        Some(profile.platform),
    )
    .context("Failed to override user agent")?;

    tab.call_method(Emulation::SetTimezoneOverride {
        timezone_id: profile.timezone.to_string(),
    })
    .context("Failed to override timezone")?;

    tab.call_method(Emulation::SetLocaleOverride {
        locale: Some(profile.locale.to_string()),
    })
    .context("Failed to override locale")?;

    if profile.touch {
        tab.call_method(Emulation::SetTouchEmulationEnabled {
            enabled: true,
            max_touch_points: Some(5),
        })
        .context("Failed to enable touch emulation")?;
    }

    tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
        source: STEALTH_SCRIPT.to_string(),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })
    .context("Failed to install stealth script")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_follow_location() {
        let uk = StealthProfile::desktop(Location::Uk);
        assert_eq!(uk.locale, "en-GB");
        assert_eq!(uk.timezone, "Europe/London");
        assert!(!uk.touch);

        let us = StealthProfile::mobile(Location::Us);
        assert_eq!(us.locale, "en-US");
        assert_eq!(us.timezone, "America/New_York");
        assert!(us.touch);
        assert_eq!(us.viewport, (390, 844));
    }
}

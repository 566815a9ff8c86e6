//! Per-context browser identity: user agent, viewport, locale, geolocation.

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Chromium flags that drop the most obvious automation tells.
pub const LAUNCH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[(1920, 1080), (1536, 864), (1440, 900), (1366, 768), (1280, 800)];

/// (locale, timezone, latitude, longitude)
const REGIONS: &[(&str, &str, f64, f64)] = &[
    ("en-US", "America/New_York", 40.7128, -74.0060),
    ("en-US", "America/Chicago", 41.8781, -87.6298),
    ("en-US", "America/Los_Angeles", 34.0522, -118.2437),
    ("en-GB", "Europe/London", 51.5074, -0.1278),
    ("en-CA", "America/Toronto", 43.6532, -79.3832),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub locale: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Fingerprint {
    /// Pick a plausible identity. Coordinates are jittered a little so two
    /// contexts in the same region do not report identical positions.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let user_agent = USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0]);
        let (w, h) = VIEWPORTS.choose(rng).copied().unwrap_or(VIEWPORTS[0]);
        let (locale, timezone, lat, lon) = REGIONS.choose(rng).copied().unwrap_or(REGIONS[0]);
        Self {
            user_agent: user_agent.to_string(),
            viewport_width: w,
            viewport_height: h,
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            latitude: lat + rng.gen_range(-0.05..0.05),
            longitude: lon + rng.gen_range(-0.05..0.05),
        }
    }

    /// Script installed before any page script runs.
    pub fn stealth_script(&self) -> String {
        let lang = crate::engine::js_string(&self.locale);
        let short = crate::engine::js_string(self.locale.split('-').next().unwrap_or("en"));
        format!(
            r#"(() => {{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
  Object.defineProperty(navigator, 'languages', {{ get: () => [{lang}, {short}] }});
  Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
  window.chrome = window.chrome || {{ runtime: {{}} }};
  const pos = {{ coords: {{ latitude: {lat}, longitude: {lon}, accuracy: 50 }}, timestamp: Date.now() }};
  if (navigator.geolocation) {{
    navigator.geolocation.getCurrentPosition = (ok) => ok(pos);
    navigator.geolocation.watchPosition = (ok) => {{ ok(pos); return 0; }};
  }}
}})();"#,
            lat = self.latitude,
            lon = self.longitude,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn random_fingerprint_uses_known_values() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let fp = Fingerprint::random(&mut rng);
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&(fp.viewport_width, fp.viewport_height)));
            let region = REGIONS.iter().find(|r| r.1 == fp.timezone).unwrap();
            assert_eq!(region.0, fp.locale);
            assert!((fp.latitude - region.2).abs() <= 0.05);
        }
    }

    #[test]
    fn stealth_script_hides_webdriver_flag() {
        let fp = Fingerprint::random(&mut StdRng::seed_from_u64(1));
        let script = fp.stealth_script();
        assert!(script.contains("'webdriver'"));
        assert!(script.contains(&format!("\"{}\"", fp.locale)));
    }
}

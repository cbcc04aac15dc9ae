//! Fetch provider/orchestrator wire types (spec §4.2/§4.3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The nine fetch providers from spec §4.2: four free, four paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Http,
    MobileUa,
    Headless,
    Flaresolverr,
    Brightdata,
    ScrapingBrowser,
    TwocaptchaProxy,
    TwocaptchaDatadome,
}

impl ProviderKind {
    /// Free providers have zero marginal cost; paid providers carry a
    /// fixed per-request cost looked up from the provider cost table.
    pub fn is_paid(self) -> bool {
        matches!(
            self,
            ProviderKind::Brightdata
                | ProviderKind::ScrapingBrowser
                | ProviderKind::TwocaptchaProxy
                | ProviderKind::TwocaptchaDatadome
        )
    }

    pub fn default_free_order() -> [ProviderKind; 4] {
        [
            ProviderKind::Http,
            ProviderKind::MobileUa,
            ProviderKind::Headless,
            ProviderKind::Flaresolverr,
        ]
    }

    pub fn default_paid_order() -> [ProviderKind; 4] {
        [
            ProviderKind::Brightdata,
            ProviderKind::ScrapingBrowser,
            ProviderKind::TwocaptchaProxy,
            ProviderKind::TwocaptchaDatadome,
        ]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Http => "http",
            ProviderKind::MobileUa => "mobile_ua",
            ProviderKind::Headless => "headless",
            ProviderKind::Flaresolverr => "flaresolverr",
            ProviderKind::Brightdata => "brightdata",
            ProviderKind::ScrapingBrowser => "scraping_browser",
            ProviderKind::TwocaptchaProxy => "twocaptcha_proxy",
            ProviderKind::TwocaptchaDatadome => "twocaptcha_datadome",
        };
        f.write_str(s)
    }
}

/// How an adapter call, or the orchestrator as a whole, resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Ok,
    Blocked,
    CaptchaRequired,
    Empty,
    Timeout,
    NetworkError,
    ProviderError,
    RateLimited,
    PreferredUnavailable,
    InterstitialGeo,
}

/// Local classification of *why* a response looked blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Cloudflare,
    Datadome,
    Captcha,
    RateLimit,
    Geo,
    Generic,
}

/// Input to `FetchProvider::execute` / `Orchestrator::fetch`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub domain: String,
    pub user_agent: Option<String>,
    pub cookies: Option<String>,
    pub headers: HashMap<String, String>,
    pub render_wait_ms: u64,
    pub geo_country: Option<String>,
    pub timeout_ms: u64,
}

/// Output of one adapter call (spec §4.2).
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub provider: ProviderKind,
    pub outcome: FetchOutcome,
    pub http_status: Option<u16>,
    pub final_url: Option<String>,
    pub body_text: Option<String>,
    pub body_bytes: u64,
    pub block_kind: Option<BlockKind>,
    pub signals: Vec<String>,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub country: Option<String>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome == FetchOutcome::Ok
    }
}

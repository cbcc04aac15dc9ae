//! The eight fetch adapters (spec §4.2) and the registry that resolves a
//! [`ProviderKind`] to its [`FetchProvider`] implementation.

pub mod brightdata;
pub mod flaresolverr;
pub mod headless;
pub mod http;
mod remote;
pub mod scraping_browser;
pub mod twocaptcha;

use std::collections::HashMap;
use std::sync::Arc;

use sentinel_domain::model::ProviderKind;

use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

pub use brightdata::BrightdataConfig;
pub use flaresolverr::FlaresolverrConfig;
pub use headless::HeadlessConfig;
pub use scraping_browser::ScrapingBrowserConfig;
pub use twocaptcha::TwocaptchaConfig;

/// External-service base URLs/credentials for the six adapters that call
/// out to an operator-run rendering/unblocking service, plus the frozen
/// cost table shared by every adapter (spec §5a).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub headless: HeadlessConfig,
    pub flaresolverr: FlaresolverrConfig,
    pub brightdata: BrightdataConfig,
    pub scraping_browser: ScrapingBrowserConfig,
    pub twocaptcha: TwocaptchaConfig,
    pub cost_table: ProviderCostTable,
}

/// Builds the full `{ProviderKind -> FetchProvider}` map once at startup
/// (spec §9: process-wide singleton).
pub fn build_registry(config: AdapterConfig) -> HashMap<ProviderKind, Arc<dyn FetchProvider>> {
    let mut registry: HashMap<ProviderKind, Arc<dyn FetchProvider>> = HashMap::new();

    registry.insert(
        ProviderKind::Http,
        Arc::new(http::HttpProvider::new(config.cost_table.clone())),
    );
    registry.insert(
        ProviderKind::MobileUa,
        Arc::new(http::MobileUaProvider::new(config.cost_table.clone())),
    );
    registry.insert(
        ProviderKind::Headless,
        Arc::new(headless::HeadlessProvider::new(
            config.headless,
            config.cost_table.clone(),
        )),
    );
    registry.insert(
        ProviderKind::Flaresolverr,
        Arc::new(flaresolverr::FlaresolverrProvider::new(
            config.flaresolverr,
            config.cost_table.clone(),
        )),
    );
    registry.insert(
        ProviderKind::Brightdata,
        Arc::new(brightdata::BrightdataProvider::new(
            config.brightdata,
            config.cost_table.clone(),
        )),
    );
    registry.insert(
        ProviderKind::ScrapingBrowser,
        Arc::new(scraping_browser::ScrapingBrowserProvider::new(
            config.scraping_browser,
            config.cost_table.clone(),
        )),
    );
    registry.insert(
        ProviderKind::TwocaptchaProxy,
        Arc::new(twocaptcha::TwocaptchaProxyProvider::new(
            config.twocaptcha.clone(),
            config.cost_table.clone(),
        )),
    );
    registry.insert(
        ProviderKind::TwocaptchaDatadome,
        Arc::new(twocaptcha::TwocaptchaDatadomeProvider::new(
            config.twocaptcha,
            config.cost_table,
        )),
    );

    registry
}

//! Scraping-browser adapter (paid, spec §4.2): a remotely-hosted real
//! browser session (CDP-over-HTTP style service) for pages that require
//! full JS execution plus residential-grade IP rotation.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::{Error, Result};
use sentinel_domain::model::{FetchRequest, FetchResult, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapters::remote::{classify_remote_outcome, RemoteServiceError};
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

#[derive(Debug, Clone)]
pub struct ScrapingBrowserConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    url: &'a str,
    wait_ms: u64,
    country: Option<&'a str>,
}

#[derive(Deserialize)]
struct SessionResponse {
    status: u16,
    final_url: Option<String>,
    html: String,
}

pub struct ScrapingBrowserProvider {
    client: reqwest::Client,
    config: ScrapingBrowserConfig,
    cost_table: ProviderCostTable,
}

impl ScrapingBrowserProvider {
    pub fn new(config: ScrapingBrowserConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for ScrapingBrowserProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();
        let cost_usd = self.cost_table.cost_of(ProviderKind::ScrapingBrowser);

        let api_key = self.config.api_key.as_deref().ok_or_else(|| Error::Provider {
            provider: ProviderKind::ScrapingBrowser.to_string(),
            message: "scraping-browser API key not configured".into(),
        })?;

        let body = SessionRequest {
            url: &request.url,
            wait_ms: request.render_wait_ms,
            country: request.geo_country.as_deref(),
        };

        let result = self
            .client
            .post(format!("{}/session", self.config.base_url))
            .bearer_auth(api_key)
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<SessionResponse>().await {
                Ok(parsed) => Ok(classify_remote_outcome(
                    ProviderKind::ScrapingBrowser,
                    parsed.status,
                    parsed.final_url,
                    parsed.html,
                    cost_usd,
                    started.elapsed().as_millis() as u64,
                )),
                Err(e) => Ok(RemoteServiceError::parse(
                    ProviderKind::ScrapingBrowser,
                    e,
                    cost_usd,
                    started,
                )),
            },
            Err(e) => Ok(RemoteServiceError::transport(
                ProviderKind::ScrapingBrowser,
                e,
                cost_usd,
                started,
            )),
        }
    }
}

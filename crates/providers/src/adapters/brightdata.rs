//! Bright Data Web Unlocker adapter (paid, spec §4.2). Routes the request
//! through Bright Data's unblocking proxy zone; geo targeting is passed
//! through from `FetchRequest.geo_country`.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::{Error, Result};
use sentinel_domain::model::{FetchRequest, FetchResult, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapters::remote::{classify_remote_outcome, RemoteServiceError};
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

#[derive(Debug, Clone)]
pub struct BrightdataConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub zone: Option<String>,
}

#[derive(Serialize)]
struct UnlockerRequest<'a> {
    zone: &'a str,
    url: &'a str,
    country: Option<&'a str>,
    format: &'static str,
}

#[derive(Deserialize)]
struct UnlockerResponse {
    status_code: u16,
    url: Option<String>,
    body: String,
}

pub struct BrightdataProvider {
    client: reqwest::Client,
    config: BrightdataConfig,
    cost_table: ProviderCostTable,
}

impl BrightdataProvider {
    pub fn new(config: BrightdataConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for BrightdataProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();
        let cost_usd = self.cost_table.cost_of(ProviderKind::Brightdata);

        let api_key = self.config.api_key.as_deref().ok_or_else(|| Error::Provider {
            provider: ProviderKind::Brightdata.to_string(),
            message: "BRIGHTDATA_API_KEY not configured".into(),
        })?;
        let zone = self.config.zone.as_deref().ok_or_else(|| Error::Provider {
            provider: ProviderKind::Brightdata.to_string(),
            message: "BRIGHTDATA_ZONE not configured".into(),
        })?;

        let body = UnlockerRequest {
            zone,
            url: &request.url,
            country: request.geo_country.as_deref(),
            format: "raw",
        };

        let result = self
            .client
            .post(format!("{}/request", self.config.base_url))
            .bearer_auth(api_key)
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<UnlockerResponse>().await {
                Ok(parsed) => Ok(classify_remote_outcome(
                    ProviderKind::Brightdata,
                    parsed.status_code,
                    parsed.url,
                    parsed.body,
                    cost_usd,
                    started.elapsed().as_millis() as u64,
                )),
                Err(e) => Ok(RemoteServiceError::parse(
                    ProviderKind::Brightdata,
                    e,
                    cost_usd,
                    started,
                )),
            },
            Err(e) => Ok(RemoteServiceError::transport(
                ProviderKind::Brightdata,
                e,
                cost_usd,
                started,
            )),
        }
    }
}

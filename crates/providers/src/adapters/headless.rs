//! Headless-render adapter: a locally or remotely operated headless
//! browser service (e.g. a Playwright/Chromium sidecar) reached over HTTP.
//! Shares the same request/response shaping as the remote unblocking
//! adapters (`flaresolverr`, `brightdata`, ...): POST the target URL plus
//! render options, get back `{status, final_url, body}`.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::{FetchOutcome, FetchRequest, FetchResult, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapters::remote::{classify_remote_outcome, RemoteServiceError};
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub base_url: String,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    wait_ms: u64,
    user_agent: Option<&'a str>,
}

#[derive(Deserialize)]
struct RenderResponse {
    status: u16,
    final_url: Option<String>,
    body: String,
}

pub struct HeadlessProvider {
    client: reqwest::Client,
    config: HeadlessConfig,
    cost_table: ProviderCostTable,
}

impl HeadlessProvider {
    pub fn new(config: HeadlessConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for HeadlessProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();
        let cost_usd = self.cost_table.cost_of(ProviderKind::Headless);

        let body = RenderRequest {
            url: &request.url,
            wait_ms: request.render_wait_ms,
            user_agent: request.user_agent.as_deref(),
        };

        let result = self
            .client
            .post(format!("{}/render", self.config.base_url))
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<RenderResponse>().await {
                Ok(parsed) => Ok(classify_remote_outcome(
                    ProviderKind::Headless,
                    parsed.status,
                    parsed.final_url,
                    parsed.body,
                    cost_usd,
                    started.elapsed().as_millis() as u64,
                )),
                Err(e) => Ok(RemoteServiceError::parse(
                    ProviderKind::Headless,
                    e,
                    cost_usd,
                    started,
                )),
            },
            Err(e) => Ok(RemoteServiceError::transport(
                ProviderKind::Headless,
                e,
                cost_usd,
                started,
            )),
        }
    }
}

//! FlareSolverr adapter: a local/remote FlareSolverr instance that solves
//! Cloudflare IUAM/JS challenges and returns the rendered page. Free tier
//! (spec §4.2): self-hosted, no per-request cost.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::{FetchRequest, FetchResult, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapters::remote::{classify_remote_outcome, RemoteServiceError};
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

#[derive(Debug, Clone)]
pub struct FlaresolverrConfig {
    pub base_url: String,
}

#[derive(Serialize)]
struct FlaresolverrRequest<'a> {
    cmd: &'static str,
    url: &'a str,
    #[serde(rename = "maxTimeout")]
    max_timeout_ms: u64,
}

#[derive(Deserialize)]
struct FlaresolverrSolution {
    status: u16,
    url: Option<String>,
    response: String,
}

#[derive(Deserialize)]
struct FlaresolverrResponse {
    solution: FlaresolverrSolution,
}

pub struct FlaresolverrProvider {
    client: reqwest::Client,
    config: FlaresolverrConfig,
    cost_table: ProviderCostTable,
}

impl FlaresolverrProvider {
    pub fn new(config: FlaresolverrConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for FlaresolverrProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();
        let cost_usd = self.cost_table.cost_of(ProviderKind::Flaresolverr);

        let body = FlaresolverrRequest {
            cmd: "request.get",
            url: &request.url,
            max_timeout_ms: request.timeout_ms,
        };

        let result = self
            .client
            .post(format!("{}/v1", self.config.base_url))
            .timeout(std::time::Duration::from_millis(request.timeout_ms))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<FlaresolverrResponse>().await {
                Ok(parsed) => Ok(classify_remote_outcome(
                    ProviderKind::Flaresolverr,
                    parsed.solution.status,
                    parsed.solution.url,
                    parsed.solution.response,
                    cost_usd,
                    started.elapsed().as_millis() as u64,
                )),
                Err(e) => Ok(RemoteServiceError::parse(
                    ProviderKind::Flaresolverr,
                    e,
                    cost_usd,
                    started,
                )),
            },
            Err(e) => Ok(RemoteServiceError::transport(
                ProviderKind::Flaresolverr,
                e,
                cost_usd,
                started,
            )),
        }
    }
}

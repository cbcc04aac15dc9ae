//! 2Captcha-backed adapters (paid, spec §4.2): two variants of the same
//! underlying CAPTCHA-solving service, differing in what they solve.
//! `twocaptcha_proxy` solves a generic reCAPTCHA/hCaptcha challenge and
//! replays the page through 2Captcha's proxy pool; `twocaptcha_datadome`
//! solves a DataDome challenge token specifically.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::{Error, Result};
use sentinel_domain::model::{FetchRequest, FetchResult, ProviderKind};
use serde::{Deserialize, Serialize};

use crate::adapters::remote::{classify_remote_outcome, RemoteServiceError};
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

#[derive(Debug, Clone)]
pub struct TwocaptchaConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Serialize)]
struct SolveRequest<'a> {
    method: &'static str,
    url: &'a str,
    key: &'a str,
}

#[derive(Deserialize)]
struct SolveResponse {
    status: u16,
    final_url: Option<String>,
    body: String,
}

async fn call(
    client: &reqwest::Client,
    config: &TwocaptchaConfig,
    method: &'static str,
    provider: ProviderKind,
    cost_table: &ProviderCostTable,
    request: &FetchRequest,
) -> Result<FetchResult> {
    let started = Instant::now();
    let cost_usd = cost_table.cost_of(provider);

    let api_key = config.api_key.as_deref().ok_or_else(|| Error::Provider {
        provider: provider.to_string(),
        message: "2captcha API key not configured".into(),
    })?;

    let body = SolveRequest {
        method,
        url: &request.url,
        key: api_key,
    };

    let result = client
        .post(format!("{}/solve", config.base_url))
        .timeout(std::time::Duration::from_millis(request.timeout_ms))
        .json(&body)
        .send()
        .await;

    match result {
        Ok(response) => match response.json::<SolveResponse>().await {
            Ok(parsed) => Ok(classify_remote_outcome(
                provider,
                parsed.status,
                parsed.final_url,
                parsed.body,
                cost_usd,
                started.elapsed().as_millis() as u64,
            )),
            Err(e) => Ok(RemoteServiceError::parse(provider, e, cost_usd, started)),
        },
        Err(e) => Ok(RemoteServiceError::transport(provider, e, cost_usd, started)),
    }
}

pub struct TwocaptchaProxyProvider {
    client: reqwest::Client,
    config: TwocaptchaConfig,
    cost_table: ProviderCostTable,
}

impl TwocaptchaProxyProvider {
    pub fn new(config: TwocaptchaConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for TwocaptchaProxyProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        call(
            &self.client,
            &self.config,
            "userrecaptcha",
            ProviderKind::TwocaptchaProxy,
            &self.cost_table,
            request,
        )
        .await
    }
}

pub struct TwocaptchaDatadomeProvider {
    client: reqwest::Client,
    config: TwocaptchaConfig,
    cost_table: ProviderCostTable,
}

impl TwocaptchaDatadomeProvider {
    pub fn new(config: TwocaptchaConfig, cost_table: ProviderCostTable) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            cost_table,
        }
    }
}

#[async_trait]
impl FetchProvider for TwocaptchaDatadomeProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        call(
            &self.client,
            &self.config,
            "datadome",
            ProviderKind::TwocaptchaDatadome,
            &self.cost_table,
            request,
        )
        .await
    }
}

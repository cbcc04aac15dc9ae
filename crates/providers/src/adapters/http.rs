//! Direct HTTP adapters: `http` (plain desktop UA) and `mobile_ua` (fixed
//! mobile UA, otherwise identical). Grounded on the teacher's
//! `digest::fetch_source` — a `reqwest::Client` built per call with a
//! request timeout, GET, read the body, classify the outcome.

use std::time::Instant;

use async_trait::async_trait;
use sentinel_domain::error::{Error, Result};
use sentinel_domain::model::{FetchOutcome, FetchRequest, FetchResult, ProviderKind};

use crate::block_detect::classify_block;
use crate::cost_table::ProviderCostTable;
use crate::traits::FetchProvider;

const DESKTOP_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MOBILE_UA: &str =
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";

async fn fetch(
    request: &FetchRequest,
    provider: ProviderKind,
    default_ua: &str,
    cost_table: &ProviderCostTable,
) -> Result<FetchResult> {
    let started = Instant::now();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_millis(request.timeout_ms))
        .build()
        .map_err(|e| Error::Provider {
            provider: provider.to_string(),
            message: format!("failed to build HTTP client: {e}"),
        })?;

    let ua = request
        .user_agent
        .clone()
        .unwrap_or_else(|| default_ua.to_string());

    let mut builder = client.get(&request.url).header("User-Agent", ua);
    for (k, v) in &request.headers {
        builder = builder.header(k, v);
    }
    if let Some(cookies) = &request.cookies {
        builder = builder.header("Cookie", cookies);
    }

    let cost_usd = cost_table.cost_of(provider);

    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) if e.is_timeout() => {
            return Ok(FetchResult {
                provider,
                outcome: FetchOutcome::Timeout,
                http_status: None,
                final_url: None,
                body_text: None,
                body_bytes: 0,
                block_kind: None,
                signals: vec![e.to_string()],
                cost_usd,
                latency_ms: started.elapsed().as_millis() as u64,
                country: None,
            });
        }
        Err(e) => {
            return Ok(FetchResult {
                provider,
                outcome: FetchOutcome::NetworkError,
                http_status: None,
                final_url: None,
                body_text: None,
                body_bytes: 0,
                block_kind: None,
                signals: vec![e.to_string()],
                cost_usd,
                latency_ms: started.elapsed().as_millis() as u64,
                country: None,
            });
        }
    };

    let status = response.status().as_u16();
    let final_url = Some(response.url().to_string());
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect::<std::collections::HashMap<_, _>>();

    let body = match response.text().await {
        Ok(b) => b,
        Err(e) => {
            return Ok(FetchResult {
                provider,
                outcome: FetchOutcome::NetworkError,
                http_status: Some(status),
                final_url,
                body_text: None,
                body_bytes: 0,
                block_kind: None,
                signals: vec![format!("failed reading body: {e}")],
                cost_usd,
                latency_ms: started.elapsed().as_millis() as u64,
                country: None,
            });
        }
    };

    let latency_ms = started.elapsed().as_millis() as u64;
    let body_bytes = body.len() as u64;
    let block_kind = classify_block(Some(status), &headers, &body);

    let outcome = match (status, block_kind) {
        (_, Some(kind)) => match kind {
            sentinel_domain::model::BlockKind::Captcha => FetchOutcome::CaptchaRequired,
            sentinel_domain::model::BlockKind::RateLimit => FetchOutcome::RateLimited,
            sentinel_domain::model::BlockKind::Geo => FetchOutcome::InterstitialGeo,
            _ => FetchOutcome::Blocked,
        },
        (200..=299, None) if body.trim().is_empty() => FetchOutcome::Empty,
        (200..=299, None) => FetchOutcome::Ok,
        (400..=499, None) => FetchOutcome::ProviderError,
        (500..=599, None) => FetchOutcome::ProviderError,
        _ => FetchOutcome::ProviderError,
    };

    Ok(FetchResult {
        provider,
        outcome,
        http_status: Some(status),
        final_url,
        body_text: if body.is_empty() { None } else { Some(body) },
        body_bytes,
        block_kind,
        signals: Vec::new(),
        cost_usd,
        latency_ms,
        country: None,
    })
}

pub struct HttpProvider {
    cost_table: ProviderCostTable,
}

impl HttpProvider {
    pub fn new(cost_table: ProviderCostTable) -> Self {
        Self { cost_table }
    }
}

#[async_trait]
impl FetchProvider for HttpProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        fetch(request, ProviderKind::Http, DESKTOP_UA, &self.cost_table).await
    }
}

pub struct MobileUaProvider {
    cost_table: ProviderCostTable,
}

impl MobileUaProvider {
    pub fn new(cost_table: ProviderCostTable) -> Self {
        Self { cost_table }
    }
}

#[async_trait]
impl FetchProvider for MobileUaProvider {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult> {
        fetch(request, ProviderKind::MobileUa, MOBILE_UA, &self.cost_table).await
    }
}

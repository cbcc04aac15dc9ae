//! Shared response classification for adapters that call an
//! externally-operated rendering/unblocking service over HTTP, rather than
//! fetching the target URL directly (headless, flaresolverr, brightdata,
//! scraping_browser, the two 2captcha variants).

use std::collections::HashMap;
use std::time::Instant;

use sentinel_domain::model::{BlockKind, FetchOutcome, FetchResult, ProviderKind};

use crate::block_detect::classify_block;

pub fn classify_remote_outcome(
    provider: ProviderKind,
    status: u16,
    final_url: Option<String>,
    body: String,
    cost_usd: f64,
    latency_ms: u64,
) -> FetchResult {
    let headers = HashMap::new();
    let block_kind = classify_block(Some(status), &headers, &body);

    let outcome = match (status, block_kind) {
        (_, Some(BlockKind::Captcha)) => FetchOutcome::CaptchaRequired,
        (_, Some(BlockKind::RateLimit)) => FetchOutcome::RateLimited,
        (_, Some(BlockKind::Geo)) => FetchOutcome::InterstitialGeo,
        (_, Some(_)) => FetchOutcome::Blocked,
        (200..=299, None) if body.trim().is_empty() => FetchOutcome::Empty,
        (200..=299, None) => FetchOutcome::Ok,
        _ => FetchOutcome::ProviderError,
    };

    let body_bytes = body.len() as u64;
    FetchResult {
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
    }
}

/// Builds the `FetchResult` for a transport- or parse-level failure talking
/// to the remote service itself (as opposed to a failure the remote service
/// reports about the target page, which `classify_remote_outcome` handles).
pub struct RemoteServiceError;

impl RemoteServiceError {
    pub fn transport(
        provider: ProviderKind,
        error: reqwest::Error,
        cost_usd: f64,
        started: Instant,
    ) -> FetchResult {
        let outcome = if error.is_timeout() {
            FetchOutcome::Timeout
        } else {
            FetchOutcome::NetworkError
        };
        FetchResult {
            provider,
            outcome,
            http_status: None,
            final_url: None,
            body_text: None,
            body_bytes: 0,
            block_kind: None,
            signals: vec![error.to_string()],
            cost_usd,
            latency_ms: started.elapsed().as_millis() as u64,
            country: None,
        }
    }

    pub fn parse(
        provider: ProviderKind,
        error: reqwest::Error,
        cost_usd: f64,
        started: Instant,
    ) -> FetchResult {
        FetchResult {
            provider,
            outcome: FetchOutcome::ProviderError,
            http_status: None,
            final_url: None,
            body_text: None,
            body_bytes: 0,
            block_kind: None,
            signals: vec![format!("malformed service response: {error}")],
            cost_usd,
            latency_ms: started.elapsed().as_millis() as u64,
            country: None,
        }
    }
}

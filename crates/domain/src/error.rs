//! Shared error type and the closed `errorCode` taxonomy (spec §7).

use std::fmt;

/// Shared error type used across all sentinel crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("extraction: {0}")]
    Extraction(String),

    #[error("normalization: {0}")]
    Normalization(String),

    #[error("concurrency: {0}")]
    Concurrency(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The closed `errorCode` taxonomy carried on `Run` (spec §7). Every
/// variant belongs to exactly one of the five kinds documented there;
/// `kind()` recovers the grouping for dashboards/health summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Transport
    FetchTimeout,
    FetchDns,
    FetchConnection,
    FetchTls,
    FetchHttp4xx,
    FetchHttp5xx,
    // Anti-bot
    BlockCaptchaSuspected,
    CloudflareBlock,
    DatadomeBlock,
    RatelimitBlock,
    GeoBlock,
    BotDetection,
    // Extraction
    ExtractSelectorNotFound,
    ExtractSchemaNotFound,
    ParseError,
    // Orchestration
    RateLimitedDeferred,
    RateLimitedMaxRetries,
    TimeoutRetryScheduled,
    PreferredProviderUnavailable,
    // Fatal
    SystemWorkerCrash,
    Unknown,
}

/// Broad grouping of an [`ErrorCode`], mirroring the spec §7 table headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    AntiBot,
    Extraction,
    Orchestration,
    Fatal,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            FetchTimeout | FetchDns | FetchConnection | FetchTls | FetchHttp4xx
            | FetchHttp5xx => ErrorKind::Transport,
            BlockCaptchaSuspected | CloudflareBlock | DatadomeBlock | RatelimitBlock
            | GeoBlock | BotDetection => ErrorKind::AntiBot,
            ExtractSelectorNotFound | ExtractSchemaNotFound | ParseError => {
                ErrorKind::Extraction
            }
            RateLimitedDeferred | RateLimitedMaxRetries | TimeoutRetryScheduled
            | PreferredProviderUnavailable => ErrorKind::Orchestration,
            SystemWorkerCrash | Unknown => ErrorKind::Fatal,
        }
    }

    /// Health-score penalty applied when a run finishes with this code
    /// (spec §3 lifecycle rules): selector/schema errors hit hardest (25),
    /// block/bot detection next (20), HTTP 4xx (15), everything else in
    /// the documented 5-25 range defaults to the transport/orchestration
    /// floor of 5.
    pub fn penalty(self) -> i32 {
        use ErrorCode::*;
        match self {
            ExtractSelectorNotFound | ExtractSchemaNotFound => 25,
            BlockCaptchaSuspected | CloudflareBlock | DatadomeBlock | RatelimitBlock
            | GeoBlock | BotDetection => 20,
            FetchHttp4xx | FetchHttp5xx => 15,
            ParseError => 15,
            SystemWorkerCrash => 25,
            _ => 5,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::FetchTimeout => "FETCH_TIMEOUT",
            ErrorCode::FetchDns => "FETCH_DNS",
            ErrorCode::FetchConnection => "FETCH_CONNECTION",
            ErrorCode::FetchTls => "FETCH_TLS",
            ErrorCode::FetchHttp4xx => "FETCH_HTTP_4XX",
            ErrorCode::FetchHttp5xx => "FETCH_HTTP_5XX",
            ErrorCode::BlockCaptchaSuspected => "BLOCK_CAPTCHA_SUSPECTED",
            ErrorCode::CloudflareBlock => "CLOUDFLARE_BLOCK",
            ErrorCode::DatadomeBlock => "DATADOME_BLOCK",
            ErrorCode::RatelimitBlock => "RATELIMIT_BLOCK",
            ErrorCode::GeoBlock => "GEO_BLOCK",
            ErrorCode::BotDetection => "BOT_DETECTION",
            ErrorCode::ExtractSelectorNotFound => "EXTRACT_SELECTOR_NOT_FOUND",
            ErrorCode::ExtractSchemaNotFound => "EXTRACT_SCHEMA_NOT_FOUND",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::RateLimitedDeferred => "RATE_LIMITED_DEFERRED",
            ErrorCode::RateLimitedMaxRetries => "RATE_LIMITED_MAX_RETRIES",
            ErrorCode::TimeoutRetryScheduled => "TIMEOUT_RETRY_SCHEDULED",
            ErrorCode::PreferredProviderUnavailable => "PREFERRED_PROVIDER_UNAVAILABLE",
            ErrorCode::SystemWorkerCrash => "SYSTEM_WORKER_CRASH",
            ErrorCode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

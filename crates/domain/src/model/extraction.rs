//! Extraction configuration and selector-healing types (spec §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single post-processing step applied to a raw extracted string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PostProcessStep {
    Trim,
    Lowercase,
    Uppercase,
    Replace { pattern: String, replacement: String },
    ExtractNumber,
}

/// One prior self-heal event, appended to a [`SelectorFingerprint`]'s
/// `healing_history` whenever a fallback selector takes over as primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealEvent {
    pub at: DateTime<Utc>,
    pub previous_selector: String,
    pub new_selector: String,
    pub similarity: f64,
}

/// Fingerprint persisted alongside a CSS/XPath rule so a future run can
/// validate or repair its selector (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorFingerprint {
    /// First N characters of a known-good extracted value, used to sanity
    /// check that the primary selector still targets the right element.
    pub text_anchor: Option<String>,
    /// Alternative selectors discovered during prior heals, tried after
    /// `fallbackSelectors` when the primary selector misses.
    pub alternative_selectors: Vec<String>,
    pub healing_history: Vec<HealEvent>,
}

/// Fingerprint for schema (JSON-LD/meta) extraction (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaFingerprint {
    pub block_count: usize,
    pub shape_hash: String,
}

/// Metadata produced alongside a schema extraction's raw value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtractMeta {
    pub currency: Option<String>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub cents_variant: Option<i64>,
    pub source: SchemaSource,
    pub availability_url: Option<String>,
    pub fingerprint: SchemaFingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaSource {
    JsonLd,
    Meta,
}

/// Tagged extraction configuration (spec §9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ExtractionConfig {
    Css(SelectorExtraction),
    Xpath(SelectorExtraction),
    Regex(SelectorExtraction),
    Schema(SchemaExtraction),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorExtraction {
    pub selector: String,
    pub attribute: Option<String>,
    #[serde(default)]
    pub post_process: Vec<PostProcessStep>,
    #[serde(default)]
    pub fallback_selectors: Vec<String>,
    #[serde(default)]
    pub extract_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExtraction {
    pub query: String,
    #[serde(default)]
    pub post_process: Vec<PostProcessStep>,
    #[serde(default)]
    pub fallback_selectors: Vec<String>,
}

//! Normalization configuration and the stable typed value it produces
//! (spec §4.6).

use serde::{Deserialize, Serialize};

/// Locale used to pick decimal/thousand separators when none are given
/// explicitly (spec §4.6, and the §8 round-trip test property).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Locale {
    SkSk,
    DeDe,
    EnUs,
}

impl Locale {
    /// `(decimal_separator, thousand_separator)`.
    pub fn separators(self) -> (char, char) {
        match self {
            Locale::SkSk | Locale::DeDe => (',', '.'),
            Locale::EnUs => ('.', ','),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "snake_case")]
pub enum NormalizationConfig {
    Price(PriceNormalization),
    Number(NumberNormalization),
    Text(TextNormalization),
    Availability(AvailabilityNormalization),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceNormalization {
    pub locale: Option<Locale>,
    pub decimal_separator: Option<char>,
    pub thousand_separator: Option<char>,
    pub currency: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: u32,
}

fn default_scale() -> u32 {
    2
}

impl Default for PriceNormalization {
    fn default() -> Self {
        PriceNormalization {
            locale: None,
            decimal_separator: None,
            thousand_separator: None,
            currency: None,
            scale: default_scale(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberNormalization {
    pub locale: Option<Locale>,
    pub decimal_separator: Option<char>,
    #[serde(default)]
    pub thousand_separators: Vec<char>,
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextNormalization {
    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
    #[serde(default = "default_max_snippet")]
    pub max_snippet_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_snippet() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityNormalization {
    #[serde(default)]
    pub in_stock_keywords: Vec<String>,
    #[serde(default)]
    pub out_of_stock_keywords: Vec<String>,
    #[serde(default)]
    pub preorder_keywords: Vec<String>,
    #[serde(default)]
    pub limited_keywords: Vec<String>,
}

/// One of the four availability buckets (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    InStock,
    OutOfStock,
    Preorder,
    Limited,
    Unknown,
}

/// The stable typed value produced by normalization (spec §9 Design
/// Notes: `NormalizedValue` is a tagged variant, not an untyped column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedValue {
    Price {
        value: f64,
        currency: Option<String>,
        cents_variant: Option<i64>,
    },
    Number {
        value: f64,
    },
    Text {
        snippet: String,
        hash: u32,
    },
    Availability {
        status: AvailabilityStatus,
        lead_time_days: Option<u32>,
        availability_url: Option<String>,
    },
}

impl NormalizedValue {
    /// Equality for anti-flap / dedupe purposes: two normalized values
    /// are "the same observation" when this returns true. Price equality
    /// additionally honors `cents_variant` when both sides carry one
    /// (schema extraction preserves cents variants for equality per
    /// spec §4.6).
    pub fn value_eq(&self, other: &NormalizedValue) -> bool {
        match (self, other) {
            (
                NormalizedValue::Price {
                    value: v1,
                    currency: c1,
                    cents_variant: cv1,
                },
                NormalizedValue::Price {
                    value: v2,
                    currency: c2,
                    cents_variant: cv2,
                },
            ) => {
                if let (Some(a), Some(b)) = (cv1, cv2) {
                    a == b && c1 == c2
                } else {
                    (v1 - v2).abs() < 1e-9 && c1 == c2
                }
            }
            (NormalizedValue::Number { value: a }, NormalizedValue::Number { value: b }) => {
                (a - b).abs() < 1e-9
            }
            (NormalizedValue::Text { hash: a, .. }, NormalizedValue::Text { hash: b, .. }) => {
                a == b
            }
            (
                NormalizedValue::Availability { status: a, .. },
                NormalizedValue::Availability { status: b, .. },
            ) => a == b,
            _ => false,
        }
    }

    /// Numeric projection used by the generic `value_above`/`value_below`/
    /// `value_increased`/`value_decreased`/`percentage_change` conditions
    /// (spec §4.8.1). `None` for kinds with no natural ordering.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            NormalizedValue::Price { value, .. } => Some(*value),
            NormalizedValue::Number { value } => Some(*value),
            _ => None,
        }
    }

    /// Text projection used by `value_contains`/`value_not_contains` (spec
    /// §4.8.1): the snippet for text values, the stable representation
    /// otherwise.
    pub fn text_repr(&self) -> String {
        match self {
            NormalizedValue::Text { snippet, .. } => snippet.clone(),
            other => other.stable_repr(),
        }
    }

    /// A stable string for hashing into the dedupe key (spec §4.8.2).
    pub fn stable_repr(&self) -> String {
        match self {
            NormalizedValue::Price {
                value,
                currency,
                cents_variant,
            } => format!(
                "price:{:.6}:{}:{}",
                value,
                currency.as_deref().unwrap_or(""),
                cents_variant.unwrap_or(-1)
            ),
            NormalizedValue::Number { value } => format!("number:{:.6}", value),
            NormalizedValue::Text { hash, .. } => format!("text:{:08x}", hash),
            NormalizedValue::Availability {
                status,
                lead_time_days,
                ..
            } => format!("availability:{:?}:{:?}", status, lead_time_days),
        }
    }
}

//! Normalization dispatch (spec §4.6). Turns a raw extracted string into
//! a [`sentinel_domain::model::NormalizedValue`] per `NormalizationConfig`.

use sentinel_domain::error::{Error, Result};
use sentinel_domain::model::{
    AvailabilityNormalization, AvailabilityStatus, Locale, NormalizationConfig, NormalizedValue,
    NumberNormalization, PriceNormalization, TextNormalization,
};
use sentinel_domain::util::djb2;

/// Entry point: dispatch on `ruleType` (spec §4.6).
pub fn normalize(
    config: &NormalizationConfig,
    raw: &str,
    schema_currency: Option<&str>,
    schema_cents_variant: Option<i64>,
) -> Result<NormalizedValue> {
    match config {
        NormalizationConfig::Price(cfg) => normalize_price(cfg, raw, schema_currency, schema_cents_variant),
        NormalizationConfig::Number(cfg) => normalize_number(cfg, raw),
        NormalizationConfig::Text(cfg) => Ok(normalize_text(cfg, raw)),
        NormalizationConfig::Availability(cfg) => Ok(normalize_availability(cfg, raw)),
    }
}

fn resolve_separators(
    locale: Option<Locale>,
    decimal: Option<char>,
    thousand: Option<char>,
) -> (char, char) {
    let (loc_decimal, loc_thousand) = locale.map(Locale::separators).unwrap_or(('.', ','));
    (decimal.unwrap_or(loc_decimal), thousand.unwrap_or(loc_thousand))
}

/// Strip currency symbols/whitespace (including NBSP), apply the
/// decimal/thousand separator convention, and parse to `f64`.
fn parse_numeric(raw: &str, decimal_sep: char, thousand_sep: char) -> Result<f64> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == thousand_sep {
            continue;
        }
        if ch == decimal_sep {
            cleaned.push('.');
        } else if ch.is_ascii_digit() || ch == '-' {
            cleaned.push(ch);
        }
        // currency symbols, whitespace (incl. U+00A0 NBSP), and anything
        // else are dropped silently.
    }
    cleaned
        .parse::<f64>()
        .map_err(|_| Error::Normalization(format!("PARSE_ERROR: could not parse number from {raw:?}")))
}

fn normalize_price(
    cfg: &PriceNormalization,
    raw: &str,
    schema_currency: Option<&str>,
    schema_cents_variant: Option<i64>,
) -> Result<NormalizedValue> {
    let (decimal_sep, thousand_sep) =
        resolve_separators(cfg.locale, cfg.decimal_separator, cfg.thousand_separator);
    let value = parse_numeric(raw, decimal_sep, thousand_sep)?;
    let scale_factor = 10f64.powi(cfg.scale as i32);
    let rounded = (value * scale_factor).round() / scale_factor;
    // Schema extraction supplies currency/cents from metadata, not config
    // (spec §4.6).
    let currency = schema_currency.map(str::to_string).or_else(|| cfg.currency.clone());
    Ok(NormalizedValue::Price {
        value: rounded,
        currency,
        cents_variant: schema_cents_variant,
    })
}

fn normalize_number(cfg: &NumberNormalization, raw: &str) -> Result<NormalizedValue> {
    let (decimal_sep, thousand_sep) = if !cfg.thousand_separators.is_empty() {
        (
            cfg.decimal_separator
                .unwrap_or_else(|| cfg.locale.map(Locale::separators).unwrap_or(('.', ',')).0),
            cfg.thousand_separators[0],
        )
    } else {
        resolve_separators(cfg.locale, cfg.decimal_separator, None)
    };
    let mut value = parse_numeric(raw, decimal_sep, thousand_sep)?;
    if let Some(scale) = cfg.scale {
        value *= scale;
    }
    Ok(NormalizedValue::Number { value })
}

fn normalize_text(cfg: &TextNormalization, raw: &str) -> NormalizedValue {
    let mut snippet = if cfg.collapse_whitespace {
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        raw.to_string()
    };
    if snippet.chars().count() > cfg.max_snippet_length {
        snippet = snippet.chars().take(cfg.max_snippet_length).collect();
    }
    let hash = djb2(&snippet);
    NormalizedValue::Text { snippet, hash }
}

fn normalize_availability(cfg: &AvailabilityNormalization, raw: &str) -> NormalizedValue {
    let lower = raw.to_lowercase();
    let matches_any = |keywords: &[String]| keywords.iter().any(|kw| lower.contains(&kw.to_lowercase()));

    let status = if matches_any(&cfg.out_of_stock_keywords) {
        AvailabilityStatus::OutOfStock
    } else if matches_any(&cfg.preorder_keywords) {
        AvailabilityStatus::Preorder
    } else if matches_any(&cfg.limited_keywords) {
        AvailabilityStatus::Limited
    } else if matches_any(&cfg.in_stock_keywords) {
        AvailabilityStatus::InStock
    } else {
        AvailabilityStatus::Unknown
    };

    NormalizedValue::Availability {
        status,
        lead_time_days: None,
        availability_url: None,
    }
}

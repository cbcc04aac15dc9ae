//! Extraction with selector healing (spec §4.5).

mod healing;
mod post_process;
mod schema;
mod selector;

pub use healing::jaccard_similarity;
pub use schema::{extract_schema, ShapeHashBlocks};

use chrono::Utc;
use sentinel_domain::error::{Error, ErrorCode, Result};
use sentinel_domain::model::{ExtractionConfig, HealEvent, SelectorFingerprint};

use post_process::apply_post_process;

/// What the extraction pipeline hands the run processor: the raw string,
/// an updated selector fingerprint (only set for CSS/XPath/regex), and
/// schema metadata (only set for schema extraction).
pub struct ExtractionOutcome {
    pub raw: String,
    pub updated_selector_fingerprint: Option<SelectorFingerprint>,
    pub schema_meta: Option<sentinel_domain::model::SchemaExtractMeta>,
}

/// Run extraction for `config` against `html`, healing against
/// `fingerprint` if the primary selector/query misses (spec §4.5 steps
/// 1-4). Falls back to CSS/XPath `fallback_selectors` if schema
/// extraction fails outright.
pub fn extract(
    config: &ExtractionConfig,
    html: &str,
    fingerprint: Option<&SelectorFingerprint>,
) -> Result<ExtractionOutcome> {
    match config {
        ExtractionConfig::Css(sel) => extract_via_selector(html, sel, fingerprint, selector::Engine::Css),
        ExtractionConfig::Xpath(sel) => {
            extract_via_selector(html, sel, fingerprint, selector::Engine::Xpath)
        }
        ExtractionConfig::Regex(sel) => {
            extract_via_selector(html, sel, fingerprint, selector::Engine::Regex)
        }
        ExtractionConfig::Schema(cfg) => match extract_schema(html, &cfg.query) {
            Ok((raw, meta)) => Ok(ExtractionOutcome {
                raw: apply_post_process(&raw, &cfg.post_process),
                updated_selector_fingerprint: None,
                schema_meta: Some(meta),
            }),
            Err(_) if !cfg.fallback_selectors.is_empty() => {
                // Schema extraction failed outright: fall back to plain CSS
                // selectors (spec §4.5: "If schema extraction fails, CSS/XPath
                // fallbackSelectors are tried").
                for fallback in &cfg.fallback_selectors {
                    let sel = sentinel_domain::model::SelectorExtraction {
                        selector: fallback.clone(),
                        attribute: None,
                        post_process: cfg.post_process.clone(),
                        fallback_selectors: Vec::new(),
                        extract_all: false,
                    };
                    if let Ok(outcome) = extract_via_selector(html, &sel, None, selector::Engine::Css)
                    {
                        return Ok(outcome);
                    }
                }
                Err(Error::Extraction(ErrorCode::ExtractSchemaNotFound.to_string()))
            }
            Err(e) => Err(e),
        },
    }
}

fn extract_via_selector(
    html: &str,
    sel: &sentinel_domain::model::SelectorExtraction,
    fingerprint: Option<&SelectorFingerprint>,
    engine: selector::Engine,
) -> Result<ExtractionOutcome> {
    let similarity_floor = 0.60;
    let primary = selector::run(engine, html, &sel.selector, sel.attribute.as_deref(), sel.extract_all);

    if let Ok(raw) = &primary {
        if let Some(anchor) = fingerprint.and_then(|f| f.text_anchor.as_deref()) {
            if !anchor_matches(raw, anchor) {
                // Anchor mismatch: treat as a miss and try to heal.
                return heal_and_extract(html, sel, fingerprint, engine, similarity_floor);
            }
        }
        let raw = apply_post_process(raw, &sel.post_process);
        let mut fp = fingerprint.cloned().unwrap_or_default();
        fp.text_anchor = Some(raw.chars().take(20).collect());
        return Ok(ExtractionOutcome {
            raw,
            updated_selector_fingerprint: Some(fp),
            schema_meta: None,
        });
    }

    heal_and_extract(html, sel, fingerprint, engine, similarity_floor)
}

fn anchor_matches(value: &str, anchor: &str) -> bool {
    let anchor_prefix: String = anchor.chars().take(20).collect::<String>().to_lowercase();
    let anchor_prefix = anchor_prefix.split_whitespace().collect::<Vec<_>>().join(" ");
    let normalized_value = value.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    normalized_value.contains(&anchor_prefix)
}

/// Step 2-3 of spec §4.5: walk `fallback_selectors` then
/// `fingerprint.alternative_selectors`, skipping alternatives whose
/// Jaccard similarity to the primary selector is below `floor`.
fn heal_and_extract(
    html: &str,
    sel: &sentinel_domain::model::SelectorExtraction,
    fingerprint: Option<&SelectorFingerprint>,
    engine: selector::Engine,
    floor: f64,
) -> Result<ExtractionOutcome> {
    let mut candidates: Vec<String> = sel.fallback_selectors.clone();
    if let Some(fp) = fingerprint {
        candidates.extend(fp.alternative_selectors.iter().cloned());
    }

    for candidate in candidates {
        let similarity = jaccard_similarity(&sel.selector, &candidate);
        if similarity < floor {
            continue;
        }
        if let Ok(raw) = selector::run(engine, html, &candidate, sel.attribute.as_deref(), sel.extract_all) {
            let raw = apply_post_process(&raw, &sel.post_process);
            let mut fp = fingerprint.cloned().unwrap_or_default();
            fp.healing_history.push(HealEvent {
                at: Utc::now(),
                previous_selector: sel.selector.clone(),
                new_selector: candidate.clone(),
                similarity,
            });
            if !fp.alternative_selectors.contains(&candidate) {
                fp.alternative_selectors.push(candidate.clone());
            }
            fp.text_anchor = Some(raw.chars().take(20).collect());
            return Ok(ExtractionOutcome {
                raw,
                updated_selector_fingerprint: Some(fp),
                schema_meta: None,
            });
        }
    }

    Err(Error::Extraction(ErrorCode::ExtractSelectorNotFound.to_string()))
}

//! Schema (JSON-LD / meta) extraction (spec §4.5): the selector string is a
//! dotted-path query (e.g. `offers.price`) evaluated against each
//! `<script type="application/ld+json">` block's parsed JSON, falling back
//! to a `<meta property="...">` lookup when no JSON-LD block answers it.

use scraper::{Html, Selector};
use sentinel_domain::error::{Error, ErrorCode, Result};
use sentinel_domain::model::{SchemaExtractMeta, SchemaFingerprint, SchemaSource};
use sentinel_domain::util::sha256_hex;
use serde_json::Value;

/// Per-block shape signature used to build the fingerprint's `shape_hash`:
/// each JSON-LD block contributes its top-level key set, sorted, so the
/// hash changes when a page's JSON-LD structure changes shape (spec §4.5
/// schema-drift) without being sensitive to the actual data values.
pub struct ShapeHashBlocks(Vec<String>);

impl ShapeHashBlocks {
    fn from_blocks(blocks: &[Value]) -> Self {
        let signatures = blocks.iter().map(shape_signature).collect();
        ShapeHashBlocks(signatures)
    }

    fn hash(&self) -> String {
        sha256_hex(&self.0.join("|"))
    }
}

fn shape_signature(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys.join(",")
        }
        Value::Array(items) => items.iter().map(shape_signature).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

/// Extract `query` from `html`'s JSON-LD blocks, falling back to a
/// `<meta property="query">` tag. Returns the raw string value plus the
/// metadata the normalizer and drift-detector need.
pub fn extract_schema(html: &str, query: &str) -> Result<(String, SchemaExtractMeta)> {
    let document = Html::parse_document(html);
    let script_selector = Selector::parse(r#"script[type="application/ld+json"]"#)
        .expect("static selector");

    let blocks: Vec<Value> = document
        .select(&script_selector)
        .filter_map(|el| {
            let text: String = el.text().collect();
            serde_json::from_str::<Value>(text.trim()).ok()
        })
        .collect();

    let fingerprint = SchemaFingerprint {
        block_count: blocks.len(),
        shape_hash: ShapeHashBlocks::from_blocks(&blocks).hash(),
    };

    for block in &blocks {
        let root = unwrap_graph(block);
        if let Some(raw) = navigate_string(root, query) {
            let meta = SchemaExtractMeta {
                currency: navigate_string(root, "offers.priceCurrency")
                    .or_else(|| navigate_string(root, "priceCurrency")),
                low: navigate_f64(root, "offers.priceSpecification.minPrice"),
                high: navigate_f64(root, "offers.priceSpecification.maxPrice"),
                cents_variant: navigate_f64(root, "offers.priceCents")
                    .map(|v| v as i64)
                    .or_else(|| navigate_f64(root, "priceCents").map(|v| v as i64)),
                source: SchemaSource::JsonLd,
                availability_url: navigate_string(root, "offers.availability")
                    .or_else(|| navigate_string(root, "availability")),
                fingerprint: fingerprint.clone(),
            };
            return Ok((raw, meta));
        }
    }

    let meta_selector = Selector::parse(&format!(r#"meta[property="{query}"]"#))
        .map_err(|e| Error::Extraction(format!("invalid meta query {query:?}: {e:?}")))?;
    if let Some(el) = document.select(&meta_selector).next() {
        if let Some(content) = el.value().attr("content") {
            let meta = SchemaExtractMeta {
                currency: None,
                low: None,
                high: None,
                cents_variant: None,
                source: SchemaSource::Meta,
                availability_url: None,
                fingerprint,
            };
            return Ok((content.to_string(), meta));
        }
    }

    Err(Error::Extraction(ErrorCode::ExtractSchemaNotFound.to_string()))
}

/// JSON-LD commonly wraps the entities of interest in `@graph`; if present,
/// use its first entry as the navigation root.
fn unwrap_graph(value: &Value) -> &Value {
    value
        .get("@graph")
        .and_then(Value::as_array)
        .and_then(|graph| graph.first())
        .unwrap_or(value)
}

fn navigate(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        if let Value::Array(items) = current {
            current = items.first()?;
        }
        current = current.get(part)?;
    }
    Some(match current {
        Value::Array(items) => items.first()?.clone(),
        other => other.clone(),
    })
}

fn navigate_string(root: &Value, path: &str) -> Option<String> {
    match navigate(root, path)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn navigate_f64(root: &Value, path: &str) -> Option<f64> {
    match navigate(root, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

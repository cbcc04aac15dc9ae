//! Selector engines backing CSS/XPath/regex extraction (spec §4.5).

use regex::Regex;
use scraper::{Html, Selector};
use sentinel_domain::error::{Error, Result};
use sxd_document::parser;
use sxd_xpath::{evaluate_xpath, Value as XpathValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Css,
    Xpath,
    Regex,
}

/// Run `selector` against `html` with the given engine. `attribute` pulls
/// an attribute's value instead of text content (CSS/XPath only);
/// `extract_all` joins every match with a single space instead of
/// returning only the first.
pub fn run(engine: Engine, html: &str, selector: &str, attribute: Option<&str>, extract_all: bool) -> Result<String> {
    match engine {
        Engine::Css => run_css(html, selector, attribute, extract_all),
        Engine::Xpath => run_xpath(html, selector, attribute, extract_all),
        Engine::Regex => run_regex(html, selector, extract_all),
    }
}

fn run_css(html: &str, selector: &str, attribute: Option<&str>, extract_all: bool) -> Result<String> {
    let document = Html::parse_document(html);
    let parsed = Selector::parse(selector)
        .map_err(|e| Error::Extraction(format!("invalid css selector {selector:?}: {e:?}")))?;

    let values: Vec<String> = document
        .select(&parsed)
        .map(|el| match attribute {
            Some(attr) => el.value().attr(attr).unwrap_or_default().to_string(),
            None => el.text().collect::<Vec<_>>().join(""),
        })
        .filter(|s| !s.is_empty())
        .collect();

    join_or_missing(values, extract_all)
}

/// For XPath, an `attribute` is folded into the query itself (`sel/@attr`)
/// unless the query already targets an attribute.
fn run_xpath(html: &str, selector: &str, attribute: Option<&str>, extract_all: bool) -> Result<String> {
    let package =
        parser::parse(html).map_err(|e| Error::Extraction(format!("xml parse error: {e:?}")))?;
    let document = package.as_document();

    let query = match attribute {
        Some(attr) if !selector.contains('@') => format!("{selector}/@{attr}"),
        _ => selector.to_string(),
    };

    let value = evaluate_xpath(&document, &query)
        .map_err(|e| Error::Extraction(format!("xpath error {query:?}: {e:?}")))?;

    let values: Vec<String> = match value {
        XpathValue::Nodeset(nodes) => nodes
            .document_order()
            .into_iter()
            .map(|n| n.string_value())
            .filter(|s| !s.is_empty())
            .collect(),
        XpathValue::String(s) if !s.is_empty() => vec![s],
        XpathValue::Number(n) => vec![n.to_string()],
        XpathValue::Boolean(b) => vec![b.to_string()],
        _ => Vec::new(),
    };

    join_or_missing(values, extract_all)
}

fn run_regex(html: &str, pattern: &str, extract_all: bool) -> Result<String> {
    let re = Regex::new(pattern).map_err(|e| Error::Extraction(format!("invalid regex {pattern:?}: {e}")))?;
    let values: Vec<String> = re
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    join_or_missing(values, extract_all)
}

fn join_or_missing(values: Vec<String>, extract_all: bool) -> Result<String> {
    if values.is_empty() {
        return Err(Error::Extraction("selector produced no match".into()));
    }
    if extract_all {
        Ok(values.join(" "))
    } else {
        Ok(values.into_iter().next().expect("non-empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_extracts_attribute_value() {
        let html = r#"<html><body><a href="/p/1">link</a></body></html>"#;
        let out = run(Engine::Css, html, "a", Some("href"), false).unwrap();
        assert_eq!(out, "/p/1");
    }

    #[test]
    fn css_extract_all_joins_matches() {
        let html = r#"<ul><li>a</li><li>b</li></ul>"#;
        let out = run(Engine::Css, html, "li", None, true).unwrap();
        assert_eq!(out, "a b");
    }

    #[test]
    fn regex_uses_first_capture_group() {
        let html = "price: 19.99 USD";
        let out = run(Engine::Regex, html, r"price: ([0-9.]+)", None, false).unwrap();
        assert_eq!(out, "19.99");
    }

    #[test]
    fn xpath_selects_text_content() {
        let html = r#"<html><body><span class="price">9.99</span></body></html>"#;
        let out = run(Engine::Xpath, html, "//span", None, false).unwrap();
        assert_eq!(out, "9.99");
    }

    #[test]
    fn missing_selector_is_an_error() {
        let html = "<html><body></body></html>";
        assert!(run(Engine::Css, html, ".nope", None, false).is_err());
    }
}

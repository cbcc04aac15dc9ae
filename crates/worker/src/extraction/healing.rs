//! Selector similarity for healing (spec §4.5 step 2): Jaccard index over
//! the token set `{tags, .classes, #ids, [attr...]}` of a CSS-ish selector
//! string. Used to decide whether a fallback/alternative selector is
//! "close enough" to the primary one to trust after a miss.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:#[\w-]+|\.[\w-]+|\[[^\]]*\]|[a-zA-Z][\w-]*)").expect("static pattern")
    })
}

fn tokenize(selector: &str) -> HashSet<String> {
    token_pattern()
        .find_iter(selector)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Jaccard similarity between two selectors' token sets. Two selectors
/// that tokenize to nothing (e.g. empty strings) are considered identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_selectors_are_fully_similar() {
        assert_eq!(jaccard_similarity(".price", ".price"), 1.0);
    }

    #[test]
    fn shared_class_with_one_extra_token_is_partially_similar() {
        let sim = jaccard_similarity(".price.now", ".price");
        assert!((sim - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unrelated_selectors_are_dissimilar() {
        let sim = jaccard_similarity(".price", "#footer-legal");
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn tag_and_attribute_tokens_count_toward_similarity() {
        let sim = jaccard_similarity("span.price[data-id]", "span.price");
        assert!(sim > 0.5 && sim < 1.0);
    }
}

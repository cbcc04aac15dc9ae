//! Local block classification (spec §4.2): status code, a fixed header
//! table, and a compiled pattern list over body text.

use std::collections::HashMap;

use regex::RegexSet;
use sentinel_domain::model::BlockKind;

const CHALLENGE_PATTERNS: &[&str] = &[
    r"(?i)checking your browser",
    r"(?i)cloudflare",
    r"(?i)cf-browser-verification",
    r"(?i)access denied",
    r"(?i)captcha",
    r"(?i)unusual traffic",
    r"(?i)please verify you are a human",
    r"(?i)request blocked",
];

fn challenge_set() -> &'static RegexSet {
    use std::sync::OnceLock;
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(CHALLENGE_PATTERNS).expect("challenge patterns compile"))
}

/// Classify why a response looks blocked, inspecting status, headers, and
/// body text in that order — the first unambiguous signal wins.
pub fn classify_block(
    status: Option<u16>,
    headers: &HashMap<String, String>,
    body: &str,
) -> Option<BlockKind> {
    if headers
        .keys()
        .any(|k| k.eq_ignore_ascii_case("x-datadome"))
    {
        return Some(BlockKind::Datadome);
    }

    if let Some(ray) = headers.get("cf-ray").or_else(|| headers.get("CF-RAY")) {
        if !ray.is_empty() && status == Some(403) {
            return Some(BlockKind::Cloudflare);
        }
    }

    match status {
        Some(429) => return Some(BlockKind::RateLimit),
        Some(451) => return Some(BlockKind::Geo),
        _ => {}
    }

    let matches: Vec<usize> = challenge_set().matches(body).into_iter().collect();
    if matches.iter().any(|i| matches!(i, 0 | 1 | 2)) {
        return Some(BlockKind::Cloudflare);
    }
    if matches.iter().any(|i| matches!(i, 4 | 5 | 6)) {
        return Some(BlockKind::Captcha);
    }
    if matches.iter().any(|i| matches!(i, 3 | 7)) {
        return Some(BlockKind::Generic);
    }

    None
}

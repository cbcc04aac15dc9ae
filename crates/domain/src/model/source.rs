//! `Source` and `FetchProfile` (spec §3).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::fetch::ProviderKind;
use crate::model::tier::{DomainTier, TierPolicyOverrides};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub url: String,
    pub canonical_url: String,
    pub domain: String,
    pub fetch_profile_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Derive `domain` and `canonical_url` from a raw URL (spec §3: "Canonical
/// URL + domain are derived on write"). Canonicalization here means:
/// lower-cased scheme+host, stripped default port, fragment dropped,
/// trailing slash normalized off the bare path.
pub fn derive_canonical(url: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(url).ok()?;
    let domain = parsed.host_str()?.to_lowercase();

    let mut canonical = parsed.clone();
    canonical.set_fragment(None);
    if let Some(port) = canonical.port() {
        let is_default = matches!(
            (canonical.scheme(), port),
            ("http", 80) | ("https", 443)
        );
        if is_default {
            let _ = canonical.set_port(None);
        }
    }
    let mut s = canonical.to_string();
    if s.ends_with('/') && canonical.path() == "/" && canonical.query().is_none() {
        s.pop();
    }
    Some((s, domain))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    Static,
    Render,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchProfile {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub mode: FetchMode,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub render_wait_ms: u64,
    pub preferred_provider: Option<ProviderKind>,
    #[serde(default)]
    pub disabled_providers: HashSet<ProviderKind>,
    #[serde(default)]
    pub stop_after_preferred_failure: bool,
    #[serde(default)]
    pub flaresolverr_wait_seconds: u64,
    pub geo_country: Option<String>,
    #[serde(default)]
    pub domain_tier: DomainTier,
    #[serde(default)]
    pub screenshot_on_change: bool,
    #[serde(default)]
    pub tier_policy_overrides: TierPolicyOverrides,
}

//! Tier-policy types (spec §4.4). The default table itself lives in
//! `sentinel-providers` (it is the tier-policy *resolver*'s frozen-at-boot
//! singleton); this module only carries the shared shapes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::model::fetch::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTier {
    TierA,
    TierB,
    TierC,
    Unknown,
}

impl Default for DomainTier {
    fn default() -> Self {
        DomainTier::Unknown
    }
}

/// Resolved policy a [`DomainTier`] + profile overrides produce (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct TierPolicy {
    pub preferred_provider: Option<ProviderKind>,
    pub disabled_providers: HashSet<ProviderKind>,
    pub stop_after_preferred_failure: bool,
    pub geo_country: Option<String>,
    pub slo_target: f64,
    pub allow_paid: bool,
    pub timeout_ms: u64,
}

/// Overlay applied on top of tier defaults (spec §4.4 "explicit JSONB
/// overrides"). Every field is optional; `None` means "keep the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierPolicyOverrides {
    pub preferred_provider: Option<ProviderKind>,
    pub disabled_providers: Option<HashSet<ProviderKind>>,
    pub stop_after_preferred_failure: Option<bool>,
    pub geo_country: Option<String>,
    pub slo_target: Option<f64>,
    pub allow_paid: Option<bool>,
    pub timeout_ms: Option<u64>,
}

impl TierPolicy {
    /// Overlay explicit overrides onto `self`, field by field.
    pub fn overlay(mut self, overrides: &TierPolicyOverrides) -> Self {
        if let Some(p) = overrides.preferred_provider {
            self.preferred_provider = Some(p);
        }
        if let Some(ref d) = overrides.disabled_providers {
            self.disabled_providers = d.clone();
        }
        if let Some(s) = overrides.stop_after_preferred_failure {
            self.stop_after_preferred_failure = s;
        }
        if let Some(ref g) = overrides.geo_country {
            self.geo_country = Some(g.clone());
        }
        if let Some(s) = overrides.slo_target {
            self.slo_target = s;
        }
        if let Some(a) = overrides.allow_paid {
            self.allow_paid = a;
        }
        if let Some(t) = overrides.timeout_ms {
            self.timeout_ms = t;
        }
        self
    }
}

//! Tier-policy resolver (spec §4.4): defaults per [`DomainTier`], overlaid
//! with a [`TierPolicyOverrides`] from the source's [`FetchProfile`].

use std::collections::HashSet;

use sentinel_domain::model::{DomainTier, FetchProfile, ProviderKind, TierPolicy};

// `FetchProfile` carries `preferredProvider`/`disabledProviders`/
// `stopAfterPreferredFailure`/`geoCountry` directly (the profile's own
// per-source configuration) *and* a `tierPolicyOverrides` bag for the
// remaining tier-default fields. Both layer on top of the tier defaults,
// with the profile's direct fields applied last since they are the most
// specific (per-source) setting.

/// The tier-default table (spec §9: frozen-at-boot singleton). Plain
/// function rather than a lazily-built static since it's cheap to construct
/// and every field differs by tier anyway.
fn defaults_for(tier: DomainTier) -> TierPolicy {
    let all_free: HashSet<ProviderKind> = ProviderKind::default_free_order().into_iter().collect();

    match tier {
        DomainTier::TierA => TierPolicy {
            preferred_provider: None,
            disabled_providers: HashSet::new(),
            stop_after_preferred_failure: false,
            geo_country: None,
            slo_target: 0.95,
            allow_paid: false,
            timeout_ms: 30_000,
        },
        DomainTier::TierB => TierPolicy {
            preferred_provider: Some(ProviderKind::Brightdata),
            disabled_providers: all_free,
            stop_after_preferred_failure: true,
            geo_country: None,
            slo_target: 0.95,
            allow_paid: true,
            timeout_ms: 60_000,
        },
        DomainTier::TierC => TierPolicy {
            preferred_provider: Some(ProviderKind::Brightdata),
            disabled_providers: all_free,
            stop_after_preferred_failure: false,
            geo_country: None,
            slo_target: 0.80,
            allow_paid: true,
            timeout_ms: 120_000,
        },
        DomainTier::Unknown => TierPolicy {
            preferred_provider: None,
            disabled_providers: HashSet::new(),
            stop_after_preferred_failure: false,
            geo_country: None,
            slo_target: 0.95,
            allow_paid: false,
            timeout_ms: 30_000,
        },
    }
}

/// Resolve a [`FetchProfile`]'s effective [`TierPolicy`]: tier defaults,
/// overlaid with `tierPolicyOverrides`, overlaid with the profile's own
/// direct per-source fields (spec §4.4).
pub fn resolve_tier_policy(profile: &FetchProfile) -> TierPolicy {
    let mut policy = defaults_for(profile.domain_tier).overlay(&profile.tier_policy_overrides);

    if let Some(p) = profile.preferred_provider {
        policy.preferred_provider = Some(p);
    }
    if !profile.disabled_providers.is_empty() {
        policy.disabled_providers.extend(profile.disabled_providers.iter().copied());
    }
    if profile.stop_after_preferred_failure {
        policy.stop_after_preferred_failure = true;
    }
    if profile.geo_country.is_some() {
        policy.geo_country = profile.geo_country.clone();
    }

    policy
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_domain::model::{FetchMode, TierPolicyOverrides};
    use uuid::Uuid;

    fn profile(tier: DomainTier) -> FetchProfile {
        FetchProfile {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            mode: FetchMode::Static,
            user_agent: None,
            cookies: None,
            headers: Default::default(),
            render_wait_ms: 0,
            preferred_provider: None,
            disabled_providers: Default::default(),
            stop_after_preferred_failure: false,
            flaresolverr_wait_seconds: 0,
            geo_country: None,
            domain_tier: tier,
            screenshot_on_change: false,
            tier_policy_overrides: TierPolicyOverrides::default(),
        }
    }

    #[test]
    fn tier_a_forbids_paid_by_default() {
        let policy = resolve_tier_policy(&profile(DomainTier::TierA));
        assert!(!policy.allow_paid);
        assert_eq!(policy.timeout_ms, 30_000);
    }

    #[test]
    fn tier_b_prefers_brightdata_and_stops_on_preferred_failure() {
        let policy = resolve_tier_policy(&profile(DomainTier::TierB));
        assert_eq!(policy.preferred_provider, Some(ProviderKind::Brightdata));
        assert!(policy.stop_after_preferred_failure);
        assert!(policy.disabled_providers.contains(&ProviderKind::Http));
    }

    #[test]
    fn tier_c_has_lower_slo_and_longer_timeout() {
        let policy = resolve_tier_policy(&profile(DomainTier::TierC));
        assert_eq!(policy.slo_target, 0.80);
        assert_eq!(policy.timeout_ms, 120_000);
    }

    #[test]
    fn overrides_win_field_by_field() {
        let mut p = profile(DomainTier::TierA);
        p.tier_policy_overrides.allow_paid = Some(true);
        let policy = resolve_tier_policy(&p);
        assert!(policy.allow_paid);
        assert_eq!(policy.timeout_ms, 30_000);
    }
}

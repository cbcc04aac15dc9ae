//! `Rule` and its mutable `RuleState` (spec §3, §4.7, §4.3.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::alert::AlertPolicy;
use crate::model::extraction::{ExtractionConfig, SchemaFingerprint, SelectorFingerprint};
use crate::model::normalization::{NormalizationConfig, NormalizedValue};

/// `ruleType` (spec §3): drives which `NormalizationConfig`/condition
/// families apply, independent of the extraction method used to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Price,
    Availability,
    Text,
    Number,
}

/// A run interval plus jitter bound (spec §4.10: `nextRunAt := now +
/// intervalSeconds + uniform(0, jitterSeconds)`). Auto-throttle (§4.3.2)
/// rewrites `interval_seconds` to 86 400 and stashes the original here via
/// `Rule.original_schedule`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub interval_seconds: u64,
    #[serde(default)]
    pub jitter_seconds: u64,
}

/// A watch definition: where to look (`source_id` + `extraction`), how to
/// interpret what comes back (`normalization`), on what schedule, and what
/// counts as alert-worthy change (`alert_policy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub source_id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    pub extraction: ExtractionConfig,
    pub normalization: NormalizationConfig,
    pub alert_policy: AlertPolicy,
    pub schedule: Schedule,
    /// Number of consecutive matching observations required before the
    /// anti-flap state machine commits a change (spec §4.7 / §9 Open
    /// Question: default 2).
    #[serde(default = "default_require_consecutive")]
    pub require_consecutive: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub screenshot_on_change: bool,
    pub selector_fingerprint: Option<SelectorFingerprint>,
    pub schema_fingerprint: Option<SchemaFingerprint>,
    /// 0-100, updated after every run (spec §3 lifecycle rules).
    #[serde(default = "default_health_score")]
    pub health_score: i32,
    pub last_error_code: Option<ErrorCode>,
    pub last_error_at: Option<DateTime<Utc>>,
    /// Monotonically advancing; mutated only by the scheduler's atomic
    /// claim and the run processor's re-enqueue paths (spec §3, §4.10).
    pub next_run_at: DateTime<Utc>,
    /// Set once a paid provider fires auto-throttle on a sub-daily rule
    /// (spec §4.3.2); forces `schedule.interval_seconds >= 86400` until an
    /// operator clears it.
    #[serde(default)]
    pub captcha_interval_enforced: bool,
    /// The user's prior schedule, retained while `captcha_interval_enforced`
    /// is set so it can be restored.
    #[serde(default)]
    pub original_schedule: Option<Schedule>,
    #[serde(default)]
    pub auto_throttle_disabled: bool,
    pub created_at: DateTime<Utc>,
}

fn default_require_consecutive() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_health_score() -> i32 {
    100
}

impl Rule {
    /// Apply a health-score delta, clamped to `[0, 100]` (spec §3).
    pub fn apply_health_delta(&mut self, delta: i32) {
        self.health_score = (self.health_score + delta).clamp(0, 100);
    }

    /// The effective interval currently in force: `schedule.interval_seconds`
    /// widened to at least one day whenever `captcha_interval_enforced` is
    /// set (spec §3 invariant).
    pub fn effective_interval_seconds(&self) -> u64 {
        if self.captcha_interval_enforced {
            self.schedule.interval_seconds.max(86_400)
        } else {
            self.schedule.interval_seconds
        }
    }
}

/// Anti-flap bookkeeping for a rule, mutated after every run (spec §4.7).
/// Carries a `version` for optimistic-concurrency updates (spec §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleState {
    pub rule_id: Uuid,
    pub version: u64,
    /// Last value committed as the rule's "current" observation
    /// (`lastStable` in spec §4.7).
    pub last_stable: Option<NormalizedValue>,
    /// Value seen on the most recent run, pending consecutive confirmation
    /// (`candidate` in spec §4.7).
    pub candidate: Option<NormalizedValue>,
    /// How many consecutive runs have produced `candidate`.
    pub candidate_count: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl RuleState {
    pub fn new(rule_id: Uuid) -> Self {
        RuleState {
            rule_id,
            version: 0,
            last_stable: None,
            candidate: None,
            candidate_count: 0,
            last_run_at: None,
            last_alert_at: None,
        }
    }

    /// Feed a fresh observation `v` through the spec §4.7 transition table.
    /// Returns `true` exactly when this observation causes `v` to be
    /// promoted to `last_stable` (a "confirmed change").
    ///
    /// | state | input | transition |
    /// |---|---|---|
    /// | `last_stable = null` | any `v` | `last_stable := v` (first sighting, not a change) |
    /// | `v == last_stable` | same | candidate cleared |
    /// | `v != last_stable`, no candidate or `v != candidate` | new | `candidate := v, count := 1` |
    /// | `v == candidate` | repeat | `count += 1`; promote at `count >= require_consecutive` |
    pub fn observe(&mut self, v: NormalizedValue, require_consecutive: u32) -> bool {
        let require_consecutive = require_consecutive.max(1);

        if self.last_stable.is_none() {
            self.last_stable = Some(v);
            self.candidate = None;
            self.candidate_count = 0;
            return false;
        }

        if self.last_stable.as_ref().unwrap().value_eq(&v) {
            self.candidate = None;
            self.candidate_count = 0;
            return false;
        }

        let matches_candidate = self
            .candidate
            .as_ref()
            .map(|c| c.value_eq(&v))
            .unwrap_or(false);

        if matches_candidate {
            self.candidate_count += 1;
        } else {
            self.candidate = Some(v.clone());
            self.candidate_count = 1;
        }

        if self.candidate_count >= require_consecutive {
            self.last_stable = Some(v);
            self.candidate = None;
            self.candidate_count = 0;
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalization::AvailabilityStatus;

    fn avail(status: AvailabilityStatus) -> NormalizedValue {
        NormalizedValue::Availability {
            status,
            lead_time_days: None,
            availability_url: None,
        }
    }

    #[test]
    fn first_sighting_is_not_a_change() {
        let mut state = RuleState::new(Uuid::new_v4());
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 2));
        assert_eq!(state.last_stable, Some(avail(AvailabilityStatus::InStock)));
    }

    #[test]
    fn commits_only_after_required_consecutive_matches() {
        let mut state = RuleState::new(Uuid::new_v4());
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 2));
        assert!(!state.observe(avail(AvailabilityStatus::OutOfStock), 2));
        assert!(state.observe(avail(AvailabilityStatus::OutOfStock), 2));
        assert_eq!(state.candidate_count, 0);
        assert_eq!(state.last_stable, Some(avail(AvailabilityStatus::OutOfStock)));
    }

    #[test]
    fn flapping_value_resets_candidate_streak() {
        let mut state = RuleState::new(Uuid::new_v4());
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 2));
        assert!(!state.observe(avail(AvailabilityStatus::OutOfStock), 2));
        assert_eq!(state.candidate_count, 1);
        assert!(!state.observe(avail(AvailabilityStatus::Limited), 2));
        assert_eq!(state.candidate_count, 1);
        assert_eq!(state.candidate, Some(avail(AvailabilityStatus::Limited)));
    }

    #[test]
    fn repeat_of_stable_value_clears_candidate() {
        let mut state = RuleState::new(Uuid::new_v4());
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 2));
        assert!(!state.observe(avail(AvailabilityStatus::OutOfStock), 2));
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 2));
        assert_eq!(state.candidate, None);
        assert_eq!(state.candidate_count, 0);
    }

    #[test]
    fn require_consecutive_one_confirms_immediately() {
        let mut state = RuleState::new(Uuid::new_v4());
        assert!(!state.observe(avail(AvailabilityStatus::InStock), 1));
        assert!(state.observe(avail(AvailabilityStatus::OutOfStock), 1));
    }
}

//! Alert conditions, alert policy, and the `Alert` record itself (spec §4.8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::normalization::{AvailabilityStatus, NormalizedValue};

/// Severity ordering used to pick the "highest severity" among the
/// triggered conditions on a run (spec §4.8.1: `low < medium < high <
/// critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One of the condition kinds in spec §4.8.1, grouped as the spec groups
/// them. Threshold/value payloads are carried inline; comparisons against
/// `previous`/`current` happen in [`AlertConditionKind::is_triggered`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertConditionKind {
    // Generic
    ValueChanged,
    ValueIncreased,
    ValueDecreased,
    ValueAbove { threshold: f64 },
    ValueBelow { threshold: f64 },
    ValueAppeared,
    ValueDisappeared,
    ValueEquals { value: String },
    ValueNotEquals { value: String },
    ValueContains { value: String },
    ValueNotContains { value: String },
    PercentageChange { pct: f64 },
    // Price-specific
    PriceBelow { threshold: f64 },
    PriceAbove { threshold: f64 },
    PriceDropPercent { pct: f64 },
    // Availability-specific
    AvailabilityIs { status: AvailabilityStatus },
    // Text/number
    TextChanged,
    NumberChanged,
    NumberAbove { threshold: f64 },
    NumberBelow { threshold: f64 },
}

impl AlertConditionKind {
    /// Whether this condition fires for the transition from `previous`
    /// (absent on first sighting) to `current`, the value the anti-flap
    /// state machine just committed (spec §4.8.1).
    pub fn is_triggered(&self, previous: Option<&NormalizedValue>, current: &NormalizedValue) -> bool {
        use AlertConditionKind::*;
        match self {
            ValueChanged => previous.map(|p| !p.value_eq(current)).unwrap_or(true),
            ValueIncreased => match (previous.and_then(NormalizedValue::numeric), current.numeric()) {
                (Some(p), Some(c)) => c > p,
                _ => false,
            },
            ValueDecreased => match (previous.and_then(NormalizedValue::numeric), current.numeric()) {
                (Some(p), Some(c)) => c < p,
                _ => false,
            },
            ValueAbove { threshold } => current.numeric().map(|v| v > *threshold).unwrap_or(false),
            ValueBelow { threshold } => current.numeric().map(|v| v < *threshold).unwrap_or(false),
            ValueAppeared => previous.is_none(),
            // Disappearance is signalled out-of-band (an extraction failure
            // following a previously-successful run); the condition
            // evaluator only ever sees a present `current`, so this kind
            // never fires from here. Kept as a named, never-triggered
            // variant rather than rejected at parse time so rule configs
            // authored against the full spec vocabulary still load.
            ValueDisappeared => false,
            ValueEquals { value } => &current.stable_repr() == value,
            ValueNotEquals { value } => &current.stable_repr() != value,
            ValueContains { value } => current.text_repr().contains(value.as_str()),
            ValueNotContains { value } => !current.text_repr().contains(value.as_str()),
            PercentageChange { pct } => match (previous.and_then(NormalizedValue::numeric), current.numeric()) {
                (Some(p), Some(c)) if p.abs() > 0.0 => (((c - p) / p) * 100.0).abs() >= *pct,
                _ => false,
            },
            PriceBelow { threshold } => matches!(current, NormalizedValue::Price { value, .. } if value < threshold),
            PriceAbove { threshold } => matches!(current, NormalizedValue::Price { value, .. } if value > threshold),
            PriceDropPercent { pct } => match (previous, current) {
                (
                    Some(NormalizedValue::Price { value: old, .. }),
                    NormalizedValue::Price { value: new, .. },
                ) if *old > 0.0 => ((new - old) / old) * 100.0 <= -*pct,
                _ => false,
            },
            AvailabilityIs { status } => {
                matches!(current, NormalizedValue::Availability { status: s, .. } if s == status)
            }
            TextChanged => matches!(current, NormalizedValue::Text { .. })
                && previous.map(|p| !p.value_eq(current)).unwrap_or(true),
            NumberChanged => matches!(current, NormalizedValue::Number { .. })
                && previous.map(|p| !p.value_eq(current)).unwrap_or(true),
            NumberAbove { threshold } => {
                matches!(current, NormalizedValue::Number { value } if value > threshold)
            }
            NumberBelow { threshold } => {
                matches!(current, NormalizedValue::Number { value } if value < threshold)
            }
        }
    }
}

/// A named, severity-tagged condition on a rule's alert policy. `id` is
/// stable across edits (it feeds the dedupe key's sorted condition-id
/// list, spec §4.8.2) so renaming the condition's *kind* without changing
/// its `id` is a behavior change the operator must opt into explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConditionSpec {
    pub id: String,
    pub kind: AlertConditionKind,
    pub severity: Severity,
}

/// A rule's alert policy: which conditions matter, how long to suppress
/// repeats, and where to send anything that gets through (spec §3's
/// `Rule.alertPolicy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub conditions: Vec<AlertConditionSpec>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub channel_ids: Vec<Uuid>,
}

fn default_cooldown_seconds() -> u64 {
    3600
}

/// A fired alert, post-dedupe (spec §3, §4.8.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub rule_id: Uuid,
    pub run_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub severity: Severity,
    /// The alert's kind, e.g. `"value_changed"` or `"schema_drift"` — the
    /// spec's scenarios use condition-kind strings here, not a closed enum,
    /// since schema-drift and future condition kinds need to slot in
    /// without a type change.
    pub alert_type: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Globally unique (spec §3); duplicate inserts collapse silently at
    /// the repository layer.
    pub dedupe_key: String,
    #[serde(default)]
    pub channels_sent: Vec<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

//! `Run` and `Observation` (spec §3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::fetch::{FetchOutcome, ProviderKind};
use crate::model::normalization::NormalizedValue;
use crate::model::source::FetchMode;

/// One execution of a rule: the fetch attempt(s), extraction, normalization
/// and anti-flap verdict, recorded regardless of outcome. Immutable once
/// `finished_at` is set (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub workspace_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fetch_mode_used: Option<FetchMode>,
    pub provider_used: Option<ProviderKind>,
    pub fetch_outcome: Option<FetchOutcome>,
    pub http_status: Option<u16>,
    pub error_code: Option<ErrorCode>,
    pub error_detail: Option<String>,
    #[serde(default)]
    pub block_detected: bool,
    pub content_hash: Option<String>,
    pub screenshot_path: Option<String>,
    /// Raw response body, retained only for a bounded window (spec §1
    /// Non-goals, §4.11 `rawsample-cleanup`). `None` once pruned or when
    /// the run wasn't flagged debug/problematic in the first place.
    pub raw_sample: Option<String>,
    pub cost_usd: f64,
    pub status: RunStatus,
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// What the anti-flap state machine observed this run's normalized value
/// to be relative to the previously committed value (spec §3
/// `Observation.changeKind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Increased,
    Decreased,
    Appeared,
    Changed,
}

/// One extracted and normalized value produced by a [`Run`] (spec §3).
/// Exactly one per successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub run_id: Uuid,
    pub rule_id: Uuid,
    pub extracted_raw: Option<String>,
    pub extracted_normalized: Option<NormalizedValue>,
    pub change_detected: bool,
    pub change_kind: Option<ChangeKind>,
    pub diff_summary: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

/// Classify the transition from `previous` to `current` for
/// `Observation.changeKind` (spec §3). Only called once the anti-flap
/// state machine has already decided a change is confirmed.
pub fn classify_change_kind(
    previous: Option<&NormalizedValue>,
    current: &NormalizedValue,
) -> ChangeKind {
    let Some(previous) = previous else {
        return ChangeKind::Appeared;
    };
    match (previous.numeric(), current.numeric()) {
        (Some(p), Some(c)) if c > p => ChangeKind::Increased,
        (Some(p), Some(c)) if c < p => ChangeKind::Decreased,
        _ => ChangeKind::Changed,
    }
}

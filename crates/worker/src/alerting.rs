//! Condition evaluation and two-level dedupe (spec §4.8).

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use sentinel_domain::error::Result;
use sentinel_domain::model::{AlertConditionSpec, NormalizedValue, Severity};
use sentinel_domain::repo::{AlertRepo, CooldownLock};
use sentinel_domain::util::{day_bucket, sha256_hex};
use uuid::Uuid;

/// End of the midnight-boundary overlap window during which both today's
/// and yesterday's dedupe bucket are checked (spec §4.8.2).
const OVERLAP_WINDOW_HOURS: u32 = 4;

pub struct EvaluationOutcome<'a> {
    pub triggered: Vec<&'a AlertConditionSpec>,
    pub highest_severity: Option<Severity>,
}

/// Evaluate every condition in `conditions` against the transition from
/// `previous` to `current` (spec §4.8.1), returning the subset that fired
/// and the highest severity among them.
pub fn evaluate_conditions<'a>(
    conditions: &'a [AlertConditionSpec],
    previous: Option<&NormalizedValue>,
    current: &NormalizedValue,
) -> EvaluationOutcome<'a> {
    let triggered: Vec<&AlertConditionSpec> = conditions
        .iter()
        .filter(|c| c.kind.is_triggered(previous, current))
        .collect();
    let highest_severity = triggered.iter().map(|c| c.severity).max();
    EvaluationOutcome {
        triggered,
        highest_severity,
    }
}

/// `dedupeKey = sha256(ruleId + ":" + sorted(conditionIds).join(",") + ":"
/// + sha256(normalizedValue)[0..16] + ":" + dayBucket)` (spec §4.8.2).
pub fn generate_dedupe_key(
    rule_id: Uuid,
    condition_ids: &[String],
    normalized_value: &NormalizedValue,
    tz: Tz,
    at: DateTime<Utc>,
) -> String {
    let mut sorted_ids: Vec<&str> = condition_ids.iter().map(String::as_str).collect();
    sorted_ids.sort_unstable();
    let value_hash = sha256_hex(&normalized_value.stable_repr());
    let value_prefix = &value_hash[..16];
    let bucket = day_bucket(at, tz);
    sha256_hex(&format!("{rule_id}:{}:{value_prefix}:{bucket}", sorted_ids.join(",")))
}

/// Whether an alert with this (rule, conditions, value) combination has
/// already fired today — or, within the first 4 hours after local
/// midnight, yesterday (spec §4.8.2's overlap window). The new alert is
/// always stored under today's key; this only suppresses duplicates.
pub async fn already_fired(
    alert_repo: &dyn AlertRepo,
    rule_id: Uuid,
    condition_ids: &[String],
    normalized_value: &NormalizedValue,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<bool> {
    let today_key = generate_dedupe_key(rule_id, condition_ids, normalized_value, tz, now);
    if alert_repo.exists_with_dedupe_key(&today_key).await? {
        return Ok(true);
    }

    let local_time = now.with_timezone(&tz).time();
    let overlap_cutoff = NaiveTime::from_hms_opt(OVERLAP_WINDOW_HOURS, 0, 0).expect("valid time");
    if local_time < overlap_cutoff {
        let yesterday = now - chrono::Duration::days(1);
        let yesterday_key = generate_dedupe_key(rule_id, condition_ids, normalized_value, tz, yesterday);
        if alert_repo.exists_with_dedupe_key(&yesterday_key).await? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Attempt the per-rule cooldown lock (spec §4.8.3): `SET
/// cooldown:<ruleId> <now> EX cooldownSeconds NX`. Fail-open (treat as
/// acquired) on a cache error so a transient cache outage doesn't silently
/// swallow an alert.
pub async fn try_cooldown(lock: &dyn CooldownLock, rule_id: Uuid, cooldown_seconds: u64) -> bool {
    match lock.try_acquire(&format!("cooldown:{rule_id}"), cooldown_seconds).await {
        Ok(acquired) => acquired,
        Err(e) => {
            tracing::warn!(error = %e, rule_id = %rule_id, "cooldown lock lookup failed; fail-open");
            true
        }
    }
}

//! `Rule` + `RuleState` repository (spec §3, §4.7, §4.10).
//!
//! `claim_due` implements the scheduler's atomic claim (spec §4.10 step 2:
//! `UPDATE rule SET nextRunAt = now + 365 days WHERE id IN (selected) AND
//! nextRunAt <= now`) as a single critical section under the map's write
//! lock: every candidate is re-checked against `now` while holding the
//! lock, so two concurrent callers against the same `JsonRuleRepo` can
//! never both claim the same rule (spec §8 "scheduler atomicity"). Two
//! *separate* `JsonRuleRepo` instances over the same file would not get
//! this guarantee — consistent with DESIGN.md's Open Question 4 (a real
//! multi-process deployment needs the Postgres-backed implementation this
//! trait is the seam for).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sentinel_domain::error::Result;
use sentinel_domain::model::{Rule, RuleState};
use sentinel_domain::repo::{RuleRepo, VersionConflict};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{file_path, load_vec, persist_vec};

struct Inner {
    rules: HashMap<Uuid, Rule>,
    states: HashMap<Uuid, RuleState>,
}

pub struct JsonRuleRepo {
    inner: RwLock<Inner>,
    rules_path: std::path::PathBuf,
    states_path: std::path::PathBuf,
}

impl JsonRuleRepo {
    pub fn new(state_dir: &Path) -> Self {
        let rules_path = file_path(state_dir, "rules");
        let states_path = file_path(state_dir, "rule_states");
        let rules: Vec<Rule> = load_vec(&rules_path);
        let states: Vec<RuleState> = load_vec(&states_path);
        Self {
            inner: RwLock::new(Inner {
                rules: rules.into_iter().map(|r| (r.id, r)).collect(),
                states: states.into_iter().map(|s| (s.rule_id, s)).collect(),
            }),
            rules_path,
            states_path,
        }
    }

    async fn persist_rules(&self) {
        let items: Vec<Rule> = self.inner.read().await.rules.values().cloned().collect();
        persist_vec(self.rules_path.clone(), items).await;
    }

    async fn persist_states(&self) {
        let items: Vec<RuleState> = self.inner.read().await.states.values().cloned().collect();
        persist_vec(self.states_path.clone(), items).await;
    }

    /// Atomic claim (spec §4.10 step 2). Selects up to `batch_size` enabled
    /// rules with `next_run_at <= now`, ordered by `next_run_at ASC`, and
    /// immediately pushes their `next_run_at` out to `now + 365 days` while
    /// still holding the write lock, returning the pre-claim `Rule` values
    /// to the caller (the scheduler computes the real next run itself once
    /// it has enqueued the job).
    pub async fn claim_due(&self, now: DateTime<Utc>, batch_size: usize) -> Vec<Rule> {
        let mut guard = self.inner.write().await;
        let mut candidates: Vec<Uuid> = guard
            .rules
            .values()
            .filter(|r| r.enabled && r.next_run_at <= now)
            .map(|r| r.id)
            .collect();
        candidates.sort_by_key(|id| guard.rules[id].next_run_at);
        candidates.truncate(batch_size);

        let parked = now + chrono::Duration::days(365);
        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(rule) = guard.rules.get_mut(&id) {
                if rule.next_run_at <= now {
                    let pre_claim = rule.clone();
                    rule.next_run_at = parked;
                    claimed.push(pre_claim);
                }
            }
        }
        drop(guard);
        if !claimed.is_empty() {
            self.persist_rules().await;
        }
        claimed
    }
}

#[async_trait]
impl RuleRepo for JsonRuleRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Rule>> {
        Ok(self.inner.read().await.rules.get(&id).cloned())
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Rule>> {
        Ok(self
            .inner
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.enabled && r.next_run_at <= now)
            .cloned()
            .collect())
    }

    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Rule>> {
        Ok(self
            .inner
            .read()
            .await
            .rules
            .values()
            .filter(|r| r.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn put(&self, rule: Rule) -> Result<()> {
        self.inner.write().await.rules.insert(rule.id, rule);
        self.persist_rules().await;
        Ok(())
    }

    async fn get_state(&self, rule_id: Uuid) -> Result<Option<RuleState>> {
        Ok(self.inner.read().await.states.get(&rule_id).cloned())
    }

    async fn compare_and_swap_state(
        &self,
        rule_id: Uuid,
        expected_version: u64,
        new_state: RuleState,
    ) -> std::result::Result<(), VersionConflict> {
        {
            let mut guard = self.inner.write().await;
            let found = guard
                .states
                .get(&rule_id)
                .map(|s| s.version)
                .unwrap_or(0);
            if found != expected_version {
                return Err(VersionConflict {
                    rule_id,
                    expected: expected_version,
                    found,
                });
            }
            guard.states.insert(rule_id, new_state);
        }
        self.persist_states().await;
        Ok(())
    }
}

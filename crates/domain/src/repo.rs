//! Repository traits (spec §2/§5). Each trait is implemented against a
//! JSON-file-backed store in `sentinel-worker` (see DESIGN.md's Open
//! Question resolution); `sentinel-domain` only defines the contract so
//! extraction/scheduling/alerting code can depend on an abstraction rather
//! than a storage engine.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Alert, Channel, FetchAttempt, FetchProfile, Rule, RuleState, Run, Source, Workspace,
};

#[async_trait]
pub trait WorkspaceRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Workspace>>;
    async fn list(&self) -> Result<Vec<Workspace>>;
    async fn put(&self, workspace: Workspace) -> Result<()>;
}

#[async_trait]
pub trait SourceRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Source>>;
    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Source>>;
    async fn put(&self, source: Source) -> Result<()>;
}

#[async_trait]
pub trait ChannelRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Channel>>;
    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Channel>>;
    async fn put(&self, channel: Channel) -> Result<()>;
}

#[async_trait]
pub trait FetchProfileRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<FetchProfile>>;
    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<FetchProfile>>;
    async fn put(&self, profile: FetchProfile) -> Result<()>;
}

/// Optimistic-concurrency error raised when a `compare_and_swap_state` call
/// loses the race (spec §5: bounded retries, then fail-fast).
#[derive(Debug, thiserror::Error)]
#[error("rule {rule_id} state version conflict: expected {expected}, found {found}")]
pub struct VersionConflict {
    pub rule_id: Uuid,
    pub expected: u64,
    pub found: u64,
}

#[async_trait]
pub trait RuleRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Rule>>;
    async fn list_due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<Rule>>;
    async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<Rule>>;
    async fn put(&self, rule: Rule) -> Result<()>;

    async fn get_state(&self, rule_id: Uuid) -> Result<Option<RuleState>>;

    /// Atomically replace the state for `rule_id`, failing with
    /// [`VersionConflict`] if the stored version no longer matches
    /// `expected_version`. The caller bumps `new_state.version` itself.
    async fn compare_and_swap_state(
        &self,
        rule_id: Uuid,
        expected_version: u64,
        new_state: RuleState,
    ) -> std::result::Result<(), VersionConflict>;
}

#[async_trait]
pub trait RunRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Run>>;
    async fn list_by_rule(&self, rule_id: Uuid, limit: usize) -> Result<Vec<Run>>;
    async fn put(&self, run: Run) -> Result<()>;
}

#[async_trait]
pub trait AlertRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Alert>>;
    async fn list_by_workspace(&self, workspace_id: Uuid, limit: usize) -> Result<Vec<Alert>>;
    async fn put(&self, alert: Alert) -> Result<()>;
    /// Whether an alert with this dedupe key has already fired (spec
    /// §4.8.2); used ahead of the cooldown-lock check.
    async fn exists_with_dedupe_key(&self, dedupe_key: &str) -> Result<bool>;
    /// Insert `alert`, or — if its `dedupe_key` already exists — refresh
    /// the existing row's `triggered_at`/`body` instead (spec §4.5's
    /// schema-drift "unique-constraint collision ... triggers a
    /// `triggeredAt` refresh and body-update to track recurrence").
    /// Returns `true` if this inserted a new row, `false` if it refreshed.
    async fn upsert_by_dedupe_key(&self, alert: Alert) -> Result<bool>;
}

#[async_trait]
pub trait FetchAttemptRepo: Send + Sync {
    async fn put(&self, attempt: FetchAttempt) -> Result<()>;
    async fn list_by_domain_since(
        &self,
        domain: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<FetchAttempt>>;
    async fn list_by_workspace_since(
        &self,
        workspace_id: Uuid,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<FetchAttempt>>;
}

/// Short-lived key/value cooldown lock (spec §4.8.2's `SET NX EX`
/// semantics), backing alert cooldowns and the per-domain/provider rate
/// limiter's shared state when running with more than one worker.
#[async_trait]
pub trait CooldownLock: Send + Sync {
    /// Attempt to acquire `key` for `ttl_seconds`. Returns `true` if this
    /// call won the lock, `false` if another holder already has it.
    async fn try_acquire(&self, key: &str, ttl_seconds: u64) -> Result<bool>;
}

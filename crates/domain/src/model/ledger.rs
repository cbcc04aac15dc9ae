//! `FetchAttempt`: the per-adapter-call ledger line backing budget/quota
//! accounting and the provider health signal (spec §4.3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::fetch::{BlockKind, FetchOutcome, ProviderKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub id: Uuid,
    pub run_id: Uuid,
    pub workspace_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub hostname: String,
    pub provider: ProviderKind,
    pub outcome: FetchOutcome,
    pub block_kind: Option<BlockKind>,
    pub http_status: Option<u16>,
    pub body_bytes: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl FetchAttempt {
    pub fn is_success(&self) -> bool {
        self.outcome == FetchOutcome::Ok
    }
}

//! `Workspace` and notification `Channel` (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    /// IANA timezone name. Drives the alert dedupe day-bucket (spec §4.8.2)
    /// and the §4.8.2 midnight-overlap window.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub is_canary: bool,
    #[serde(default)]
    pub daily_budget_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".into()
}

/// Where an alert gets delivered. The actual transports (email/webhook/etc)
/// are out of scope; this type only carries enough to let the worker
/// attach a channel id to an outgoing alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub kind: ChannelKind,
    pub target: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Webhook,
    Email,
    Slack,
}

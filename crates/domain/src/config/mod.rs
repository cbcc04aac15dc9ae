use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub tier_policy: TierPolicyConfig,
    #[serde(default)]
    pub brightdata: BrightdataConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
            budget: BudgetConfig::default(),
            security: SecurityConfig::default(),
            tier_policy: TierPolicyConfig::default(),
            brightdata: BrightdataConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Build a [`Config`] from process environment variables, falling back
    /// to field defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("DATABASE_URL") {
            cfg.storage.database_url = Some(v);
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            cfg.storage.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("STATE_DIR") {
            cfg.storage.state_dir = v;
        }

        if let Ok(v) = std::env::var("SCHEDULER_ENABLED") {
            cfg.scheduler.enabled = parse_bool(&v, cfg.scheduler.enabled);
        }
        if let Ok(v) = std::env::var("SCHEDULER_TICK_INTERVAL") {
            if let Ok(n) = v.parse() {
                cfg.scheduler.tick_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("SCHEDULER_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                cfg.scheduler.batch_size = n;
            }
        }

        if let Ok(v) = std::env::var("DAILY_BUDGET_USD_DEFAULT") {
            if let Ok(n) = v.parse() {
                cfg.budget.daily_budget_usd_default = n;
            }
        }

        if let Ok(v) = std::env::var("ENCRYPTION_KEY") {
            cfg.security.encryption_key = Some(v);
        }

        if let Ok(v) = std::env::var("TIER_POLICY_ENABLED") {
            cfg.tier_policy.enabled = parse_bool(&v, cfg.tier_policy.enabled);
        }
        if let Ok(v) = std::env::var("CANARY_WORKSPACE_IDS") {
            cfg.tier_policy.canary_workspace_ids = v
                .split(',')
                .filter_map(|s| Uuid::parse_str(s.trim()).ok())
                .collect();
        }

        if let Ok(v) = std::env::var("BRIGHTDATA_API_KEY") {
            cfg.brightdata.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("BRIGHTDATA_ZONE") {
            cfg.brightdata.zone = Some(v);
        }

        if let Ok(v) = std::env::var("WORKER_CONCURRENCY") {
            if let Ok(n) = v.parse() {
                cfg.worker.concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("WORKER_HEALTH_PORT") {
            if let Ok(n) = v.parse() {
                cfg.worker.health_port = n;
            }
        }

        cfg
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Repository backing store configuration. `database_url` is read and
/// validated even though the shipped repositories are JSON-file-backed
/// (see DESIGN.md's Open Question resolution); a future Postgres-backed
/// `RuleRepo`/`RunRepo` would key off the same field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            state_dir: d_state_dir(),
        }
    }
}

fn d_state_dir() -> String {
    "./data".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            tick_interval_ms: d_tick_interval(),
            batch_size: d_batch_size(),
        }
    }
}

fn d_true() -> bool {
    true
}

/// Spec §6: `SCHEDULER_TICK_INTERVAL` default 5000ms.
fn d_tick_interval() -> u64 {
    5_000
}

/// Spec §6: `SCHEDULER_BATCH_SIZE` default 500.
fn d_batch_size() -> usize {
    500
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "d_daily_budget")]
    pub daily_budget_usd_default: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_budget_usd_default: d_daily_budget(),
        }
    }
}

fn d_daily_budget() -> f64 {
    5.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Security
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `encryption_key` protects at-rest secrets (provider credentials,
/// cookies persisted in a `FetchProfile`). 32 bytes, hex or base64.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub encryption_key: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tier policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPolicyConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Workspaces allowed to exercise paid providers ahead of general
    /// rollout (spec §9 Open Question).
    #[serde(default)]
    pub canary_workspace_ids: Vec<Uuid>,
}

impl Default for TierPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            canary_workspace_ids: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brightdata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrightdataConfig {
    pub api_key: Option<String>,
    pub zone: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "d_concurrency")]
    pub concurrency: usize,
    #[serde(default = "d_health_port")]
    pub health_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: d_concurrency(),
            health_port: d_health_port(),
        }
    }
}

fn d_concurrency() -> usize {
    8
}

fn d_health_port() -> u16 {
    8080
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty
    /// vec means everything looks good; callers should refuse to start the
    /// worker if any `ConfigSeverity::Error` is present.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Some(url) = &self.storage.database_url {
            if !url.is_empty() && !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "storage.database_url".into(),
                    message: format!("unrecognized scheme in \"{url}\"; ignored by the JSON-file-backed repositories"),
                });
            }
        }

        if self.storage.state_dir.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "storage.state_dir".into(),
                message: "state_dir must not be empty".into(),
            });
        }

        if self.scheduler.tick_interval_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.tick_interval_ms".into(),
                message: "tick_interval_ms must be greater than 0".into(),
            });
        }

        if self.scheduler.batch_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.batch_size".into(),
                message: "batch_size must be greater than 0".into(),
            });
        }

        if self.budget.daily_budget_usd_default < 0.0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "budget.daily_budget_usd_default".into(),
                message: "daily_budget_usd_default must not be negative".into(),
            });
        }

        if self.security.encryption_key.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "security.encryption_key".into(),
                message: "no ENCRYPTION_KEY set; fetch profile secrets persist in plaintext".into(),
            });
        }

        if self.tier_policy.enabled && self.brightdata.api_key.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "brightdata.api_key".into(),
                message: "tier policy is enabled but no BRIGHTDATA_API_KEY is set; paid fallback providers will fail".into(),
            });
        }

        if self.worker.concurrency == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "worker.concurrency".into(),
                message: "concurrency must be greater than 0".into(),
            });
        }

        if self.worker.health_port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "worker.health_port".into(),
                message: "health_port must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

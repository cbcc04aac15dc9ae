pub mod adapters;
pub mod block_detect;
pub mod budget;
pub mod cache;
pub mod circuit_breaker;
pub mod cost_table;
pub mod orchestrator;
pub mod rate_limit;
pub mod tier_policy;
pub mod traits;

pub use cache::Cache;
pub use orchestrator::{
    decide_auto_throttle, Orchestrator, OrchestratorConfig, OrchestratorOutcome,
    ThrottleInstruction,
};
pub use tier_policy::resolve_tier_policy;
pub use traits::FetchProvider;

//! The adapter contract every fetch provider implements (spec §4.2).

use async_trait::async_trait;
use sentinel_domain::error::Result;
use sentinel_domain::model::{FetchRequest, FetchResult};

/// One fetch adapter. Implementations are pure with respect to database
/// state: they never mutate storage, only perform the HTTP call (direct or
/// via an externally-operated rendering/unblocking service) and classify
/// the outcome.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResult>;
}

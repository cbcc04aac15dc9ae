//! The shared cache abstraction backing rate-limit buckets, circuit-breaker
//! state, and alert cooldown locks (spec §4.1, §4.3 step 5, §4.8.3).
//!
//! A single `Cache` implementation backs all three concerns, mirroring the
//! spec's "Redis-class cache" being one shared resource rather than three.
//! The in-memory default works for a single-process deployment; a
//! Redis-backed implementation is provided for the multi-worker case
//! (selected by the worker binary when `REDIS_URL` is set).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sentinel_domain::error::{Error, Result};
use sentinel_domain::repo::CooldownLock;

/// Token-bucket state for one `(domain, providerKind)` key (spec §4.1).
#[derive(Debug, Clone, Copy)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: Instant,
}

/// Circuit-breaker state for one `(domain, provider)` key (spec §4.3 step 5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

/// Backing store for rate-limit buckets, circuit-breaker state, and
/// cooldown locks. Every method is async so a Redis-backed implementation
/// can perform real network round trips.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>>;
    async fn put_bucket(&self, key: &str, state: BucketState) -> Result<()>;

    async fn get_circuit(&self, key: &str) -> Result<Option<CircuitState>>;
    async fn put_circuit(&self, key: &str, state: CircuitState) -> Result<()>;

    /// `SET key value EX ttl_seconds NX` (spec §4.8.3): returns `true` if
    /// this call won the lock, `false` if another holder already has it.
    async fn set_nx_ex(&self, key: &str, ttl_seconds: u64) -> Result<bool>;
}

/// Every `Cache` also satisfies the worker-facing `CooldownLock` contract;
/// they are the same operation under two names ("try to take the lock").
#[async_trait]
impl<T: Cache + ?Sized> CooldownLock for T {
    async fn try_acquire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.set_nx_ex(key, ttl_seconds).await
    }
}

struct Lock {
    expires_at: Instant,
}

/// Default single-process cache: `parking_lot::RwLock`-guarded maps, no
/// external dependency. Correct for a single worker instance; the scheduler's
/// atomic claim (§4.10) is the true cross-process coordination mechanism, so
/// buckets/circuits being process-local is an accepted approximation (§4.1:
/// "their state is advisory").
pub struct InMemoryCache {
    buckets: Mutex<HashMap<String, BucketState>>,
    circuits: Mutex<HashMap<String, CircuitState>>,
    locks: Mutex<HashMap<String, Lock>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            circuits: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        Ok(self.buckets.lock().get(key).copied())
    }

    async fn put_bucket(&self, key: &str, state: BucketState) -> Result<()> {
        self.buckets.lock().insert(key.to_string(), state);
        Ok(())
    }

    async fn get_circuit(&self, key: &str) -> Result<Option<CircuitState>> {
        Ok(self.circuits.lock().get(key).copied())
    }

    async fn put_circuit(&self, key: &str, state: CircuitState) -> Result<()> {
        self.circuits.lock().insert(key.to_string(), state);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key) {
            if existing.expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(
            key.to_string(),
            Lock {
                expires_at: now + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(true)
    }
}

/// Redis-backed cache for multi-worker deployments. Buckets and circuit
/// state are serialized as `"<tokens>:<epoch_millis>"` / a one-byte state
/// tag since `redis`'s connection manager only speaks bytes/strings.
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Config(format!("invalid REDIS_URL: {e}")))?;
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Other(format!("redis connection: {e}")))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(format!("bucket:{key}"))
            .await
            .map_err(|e| Error::Other(format!("redis GET: {e}")))?;
        Ok(raw.and_then(|s| {
            let (tokens, millis) = s.split_once(':')?;
            let tokens: f64 = tokens.parse().ok()?;
            let millis: u64 = millis.parse().ok()?;
            Some(BucketState {
                tokens,
                last_refill: Instant::now() - Duration::from_millis(millis),
            })
        }))
    }

    async fn put_bucket(&self, key: &str, state: BucketState) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let millis = state.last_refill.elapsed().as_millis();
        let value = format!("{}:{}", state.tokens, millis);
        let _: () = conn
            .set_ex(format!("bucket:{key}"), value, 3600)
            .await
            .map_err(|e| Error::Other(format!("redis SET: {e}")))?;
        Ok(())
    }

    async fn get_circuit(&self, key: &str) -> Result<Option<CircuitState>> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(format!("circuit:{key}"))
            .await
            .map_err(|e| Error::Other(format!("redis GET: {e}")))?;
        Ok(raw.and_then(|s| {
            if let Some(rest) = s.strip_prefix("closed:") {
                rest.parse().ok().map(|n| CircuitState::Closed {
                    consecutive_failures: n,
                })
            } else if let Some(rest) = s.strip_prefix("open:") {
                rest.parse::<u64>().ok().map(|millis| CircuitState::Open {
                    opened_at: Instant::now() - Duration::from_millis(millis),
                })
            } else if s == "half_open" {
                Some(CircuitState::HalfOpen)
            } else {
                None
            }
        }))
    }

    async fn put_circuit(&self, key: &str, state: CircuitState) -> Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn().await?;
        let value = match state {
            CircuitState::Closed {
                consecutive_failures,
            } => format!("closed:{consecutive_failures}"),
            CircuitState::Open { opened_at } => format!("open:{}", opened_at.elapsed().as_millis()),
            CircuitState::HalfOpen => "half_open".to_string(),
        };
        let _: () = conn
            .set_ex(format!("circuit:{key}"), value, 86_400)
            .await
            .map_err(|e| Error::Other(format!("redis SET: {e}")))?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("EX")
            .arg(ttl_seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Other(format!("redis SET NX EX: {e}")))?;
        Ok(result.is_some())
    }
}

//! Redis-backed job store.
//!
//! Layout, under the default `enrich` namespace:
//! - `enrich:job:<key>`: the live job record for a player key (the dedup claim), with a TTL lease
//! - `enrich:queue`: list of ready job records, consumed from the right
//! - `enrich:delayed`: sorted set of retries scored by ready time (unix millis)
//!
//! Every check-then-write runs inside a Lua script so concurrent schedulers
//! and workers see it as one step.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{info, warn};

use super::{Claim, JobRecord, JobStore};
use crate::error::JobError;

const DEFAULT_NAMESPACE: &str = "enrich";

fn claim_key(namespace: &str, player_key: &str) -> String {
    format!("{}:job:{}", namespace, player_key)
}

const CLAIM_SCRIPT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    return {0, existing}
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
redis.call('LPUSH', KEYS[2], ARGV[1])
return {1, ARGV[1]}
"#;

const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, entry in ipairs(due) do
    redis.call('ZREM', KEYS[1], entry)
    redis.call('LPUSH', KEYS[2], entry)
end
return #due
"#;

const UPDATE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if cjson.decode(current)['id'] ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
"#;

const FINISH_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current and cjson.decode(current)['id'] == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisJobStore {
    redis: ConnectionManager,
    claim_ttl: Duration,
    namespace: String,
}

impl RedisJobStore {
    pub fn new(redis: ConnectionManager, claim_ttl: Duration) -> Self {
        Self {
            redis,
            claim_ttl,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Prefix for every key this store touches. Defaults to `enrich`.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    fn claim_key(&self, player_key: &str) -> String {
        claim_key(&self.namespace, player_key)
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.namespace)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.namespace)
    }

    pub async fn connect_with_retry(
        url: &str,
        max_retries: u32,
        claim_ttl: Duration,
    ) -> Result<Self, JobError> {
        let mut attempt = 0;
        loop {
            let connected = match redis::Client::open(url) {
                Ok(client) => ConnectionManager::new(client).await,
                Err(e) => Err(e),
            };

            match connected {
                Ok(conn) => {
                    info!("Connected to Redis");
                    return Ok(Self::new(conn, claim_ttl));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(e.into());
                    }
                    warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.claim_ttl.as_secs().max(1)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn claim(&self, job: JobRecord) -> Result<Claim, JobError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(&job)?;

        let (created, stored): (i64, String) = Script::new(CLAIM_SCRIPT)
            .key(self.claim_key(&job.key))
            .key(self.queue_key())
            .arg(&payload)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;

        if created == 1 {
            Ok(Claim::Created(job))
        } else {
            Ok(Claim::Existing(serde_json::from_str(&stored)?))
        }
    }

    async fn find(&self, key: &str) -> Result<Option<JobRecord>, JobError> {
        let mut conn = self.redis.clone();
        let stored: Option<String> = conn.get(self.claim_key(key)).await?;
        Ok(stored.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn pop(&self) -> Result<Option<JobRecord>, JobError> {
        let mut conn = self.redis.clone();

        let promoted: i64 = Script::new(PROMOTE_SCRIPT)
            .key(self.delayed_key())
            .key(self.queue_key())
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        if promoted > 0 {
            info!("Promoted {} delayed enrichment jobs", promoted);
        }

        loop {
            let entry: Option<String> = conn.rpop(self.queue_key(), None).await?;
            let Some(entry) = entry else {
                return Ok(None);
            };

            let queued: JobRecord = match serde_json::from_str(&entry) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Dropping undecodable queue entry: {}", e);
                    continue;
                }
            };

            match self.find(&queued.key).await? {
                Some(owner) if owner.id == queued.id => return Ok(Some(owner)),
                _ => continue,
            }
        }
    }

    async fn update(&self, job: &JobRecord) -> Result<bool, JobError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(job)?;

        let updated: i64 = Script::new(UPDATE_SCRIPT)
            .key(self.claim_key(&job.key))
            .arg(job.id.to_string())
            .arg(&payload)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;

        Ok(updated == 1)
    }

    async fn retry_later(&self, job: &JobRecord, delay: Duration) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(job)?;
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let _: i64 = conn.zadd(self.delayed_key(), payload, ready_at).await?;
        Ok(())
    }

    async fn finish(&self, job: &JobRecord) -> Result<(), JobError> {
        let mut conn = self.redis.clone();

        let _: i64 = Script::new(FINISH_SCRIPT)
            .key(self.claim_key(&job.key))
            .arg(job.id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(())
    }
}

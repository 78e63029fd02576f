//! Redis-backed queue, job records and results.
//!
//! Keys:
//! - `eval:queue`: list of JSON `QueuedJob`s (LPUSH / BLMOVE)
//! - `eval:processing`: deliveries claimed by a worker and not yet acked
//! - `eval:claims`: hash of claimed payload -> claim time in epoch millis
//! - `eval:job:{id}`: hash with `status` and the JSON job record under `job`
//! - `eval:result:{id}`: JSON `EvaluationResult`
//!
//! Claiming uses BLMOVE, so Redis 6.2 or newer is required.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{EvaluationJob, JobQueue, JobStatus, JobStore, QueuedJob, ResultStore, StoreError};
use crate::evaluation::models::EvaluationResult;

const QUEUE_KEY: &str = "eval:queue";
const PROCESSING_KEY: &str = "eval:processing";
const CLAIMS_KEY: &str = "eval:claims";
/// BLMOVE timeout in seconds.
const POP_TIMEOUT_SECS: f64 = 1.0;

// Returns 'ok' on success, 'missing' for an unknown job, else the current status.
const TRANSITION_SCRIPT: &str = r"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then return 'missing' end
if current ~= ARGV[1] then return current end
redis.call('HSET', KEYS[1], 'status', ARGV[2])
return 'ok'
";

// Claims with no recorded time get one now, so a crash between BLMOVE and the
// claim-time write still expires.
const RECLAIM_SCRIPT: &str = r"
local stale = {}
local now = tonumber(ARGV[1])
local max_age = tonumber(ARGV[2])
for _, item in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  local claimed = redis.call('HGET', KEYS[2], item)
  if not claimed then
    redis.call('HSET', KEYS[2], item, ARGV[1])
  elseif now - tonumber(claimed) >= max_age then
    redis.call('LREM', KEYS[1], 1, item)
    redis.call('HDEL', KEYS[2], item)
    table.insert(stale, item)
  end
end
return stale
";

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

fn job_key(id: Uuid) -> String {
    format!("eval:job:{id}")
}

fn result_key(id: Uuid) -> String {
    format!("eval:result:{id}")
}

/// Queue entries are matched by their exact JSON text.
fn payload(job: &QueuedJob) -> Result<String, StoreError> {
    Ok(serde_json::to_string(job)?)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct RedisStore {
    conn: MultiplexedConnection,
    /// BLMOVE blocks its connection, so pops get their own.
    pop_conn: Mutex<MultiplexedConnection>,
    transition: redis::Script,
    reclaim: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("Invalid REDIS_URL")?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to connect to Redis")?;
        let pop_conn = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to open Redis queue connection")?;
        info!("Redis connection established");

        Ok(Self {
            conn,
            pop_conn: Mutex::new(pop_conn),
            transition: redis::Script::new(TRANSITION_SCRIPT),
            reclaim: redis::Script::new(RECLAIM_SCRIPT),
        })
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn create(&self, job: &EvaluationJob) -> Result<(), StoreError> {
        let record = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(job_key(job.id))
            .arg("status")
            .arg(job.status.as_str())
            .arg("job")
            .arg(record)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationJob>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(job_key(id))
            .query_async(&mut conn)
            .await?;

        let (Some(status), Some(record)) = (fields.get("status"), fields.get("job")) else {
            return Ok(None);
        };
        let mut job: EvaluationJob = serde_json::from_str(record)?;
        // The hash field is authoritative; the record keeps its creation status.
        job.status = status.parse()?;
        Ok(Some(job))
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<(), StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { from, to });
        }

        let mut conn = self.conn.clone();
        let outcome: String = self
            .transition
            .key(job_key(id))
            .arg(from.as_str())
            .arg(to.as_str())
            .invoke_async(&mut conn)
            .await?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "missing" => Err(StoreError::NotFound(id)),
            actual => Err(StoreError::StatusConflict {
                id,
                expected: from,
                actual: actual.parse()?,
            }),
        }
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn save(&self, job_id: Uuid, result: &EvaluationResult) -> Result<(), StoreError> {
        let json = serde_json::to_string(result)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(result_key(job_id))
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<EvaluationResult>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = redis::cmd("GET")
            .arg(result_key(job_id))
            .query_async(&mut conn)
            .await?;
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn delete(&self, job_id: Uuid) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(result_key(job_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisStore {
    async fn push(&self, job: QueuedJob) -> Result<(), StoreError> {
        let json = payload(&job)?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<QueuedJob>, StoreError> {
        let moved: Option<String> = {
            let mut pop_conn = self.pop_conn.lock().await;
            redis::cmd("BLMOVE")
                .arg(QUEUE_KEY)
                .arg(PROCESSING_KEY)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(POP_TIMEOUT_SECS)
                .query_async(&mut *pop_conn)
                .await?
        };
        let Some(json) = moved else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(CLAIMS_KEY)
            .arg(&json)
            .arg(now_millis())
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn ack(&self, job: &QueuedJob) -> Result<(), StoreError> {
        let json = payload(job)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(&json)
            .ignore()
            .cmd("HDEL")
            .arg(CLAIMS_KEY)
            .arg(&json)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn reclaim_stale(&self, older_than: Duration) -> Result<Vec<QueuedJob>, StoreError> {
        let mut conn = self.conn.clone();
        let stale: Vec<String> = self
            .reclaim
            .key(PROCESSING_KEY)
            .key(CLAIMS_KEY)
            .arg(now_millis())
            .arg(older_than.as_millis() as i64)
            .invoke_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(stale.len());
        for json in stale {
            match serde_json::from_str(&json) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("dropping unreadable claimed delivery: {e}"),
            }
        }
        Ok(jobs)
    }
}

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Job payload serialized onto the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub job_id: Uuid,
    #[serde(rename = "key")]
    pub source_key: String,
}

/// A received message plus the handle needed to acknowledge it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: QueuedJob,
    receipt: String,
}

impl Delivery {
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

/// At-least-once job channel.
///
/// A received message stays in flight until `ack` is called. Messages not
/// acknowledged within the visibility timeout are returned to the pending
/// list by `requeue_expired` and delivered again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Take the next pending message, `None` if the queue is empty.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Return messages whose visibility deadline has passed to the pending list.
    async fn requeue_expired(&self) -> Result<usize, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue.
///
/// `<name>:jobs` holds pending payloads, `<name>:processing` holds payloads
/// that were handed to a worker, and `<name>:inflight` scores each in-flight
/// payload by its visibility deadline (unix millis). Every transition between
/// the three keys runs as a single Lua script so no intermediate state is
/// observable or left behind by a crash.
pub struct RedisJobQueue {
    client: redis::Client,
    queue_key: String,
    processing_key: String,
    inflight_key: String,
    visibility_timeout: Duration,
    receive_script: redis::Script,
    ack_script: redis::Script,
    requeue_script: redis::Script,
}

/// KEYS: pending, processing, inflight. ARGV: deadline.
const RECEIVE_SCRIPT: &str = r"
local payload = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if payload then
    redis.call('ZADD', KEYS[3], ARGV[1], payload)
end
return payload
";

/// KEYS: processing, inflight. ARGV: payload.
///
/// Identical payloads share one deadline, so it is only dropped once the
/// last copy leaves the processing list.
const ACK_SCRIPT: &str = r"
redis.call('LREM', KEYS[1], 1, ARGV[1])
if not redis.call('LPOS', KEYS[1], ARGV[1]) then
    redis.call('ZREM', KEYS[2], ARGV[1])
end
return 1
";

/// KEYS: pending, processing, inflight. ARGV: now.
///
/// Only payloads still in the processing list are pushed back, so a
/// message acknowledged after its deadline is not delivered again.
const REQUEUE_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
local requeued = 0
for _, payload in ipairs(expired) do
    redis.call('ZREM', KEYS[3], payload)
    local removed = redis.call('LREM', KEYS[2], 0, payload)
    for _ = 1, removed do
        redis.call('RPUSH', KEYS[1], payload)
    end
    requeued = requeued + removed
end
return requeued
";

impl RedisJobQueue {
    pub fn new(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            queue_key: format!("{queue_name}:jobs"),
            processing_key: format!("{queue_name}:processing"),
            inflight_key: format!("{queue_name}:inflight"),
            visibility_timeout,
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
            requeue_script: redis::Script::new(REQUEUE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    async fn remove_in_flight(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        payload: &str,
    ) -> Result<(), QueueError> {
        self.ack_script
            .key(&self.processing_key)
            .key(&self.inflight_key)
            .arg(payload)
            .invoke_async::<i64>(conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.queue_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let deadline = unix_millis() + self.visibility_timeout.as_millis() as i64;
        let result: Option<String> = self
            .receive_script
            .key(&self.queue_key)
            .key(&self.processing_key)
            .key(&self.inflight_key)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let Some(payload) = result else {
            return Ok(None);
        };

        match serde_json::from_str::<QueuedJob>(&payload) {
            Ok(job) => Ok(Some(Delivery {
                job,
                receipt: payload,
            })),
            Err(e) => {
                // A payload that never parses would otherwise be redelivered forever.
                tracing::error!(payload = %payload, error = %e, "Dropping malformed queue message");
                self.remove_in_flight(&mut conn, &payload).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        self.remove_in_flight(&mut conn, &delivery.receipt).await
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let requeued: i64 = self
            .requeue_script
            .key(&self.queue_key)
            .key(&self.processing_key)
            .key(&self.inflight_key)
            .arg(unix_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(requeued.max(0) as usize)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.queue_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// Process-local queue with the same visibility-timeout contract.
pub struct InMemoryJobQueue {
    state: Mutex<MemoryQueueState>,
    visibility_timeout: Duration,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<QueuedJob>,
    in_flight: HashMap<String, (QueuedJob, Instant)>,
}

impl InMemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryQueueState::default()),
            visibility_timeout,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory queue offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn publish(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.state.lock().await.pending.push_back(job.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let Some(job) = state.pending.pop_front() else {
            return Ok(None);
        };
        let receipt = Uuid::new_v4().to_string();
        state.in_flight.insert(
            receipt.clone(),
            (job.clone(), Instant::now() + self.visibility_timeout),
        );
        Ok(Some(Delivery { job, receipt }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.ensure_available()?;
        self.state.lock().await.in_flight.remove(&delivery.receipt);
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in &expired {
            if let Some((job, _)) = state.in_flight.remove(receipt) {
                state.pending.push_back(job);
            }
        }
        Ok(expired.len())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        self.ensure_available()?;
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ensure_available()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(key: &str) -> QueuedJob {
        QueuedJob {
            job_id: Uuid::new_v4(),
            source_key: key.to_string(),
        }
    }

    #[test]
    fn payload_uses_key_field_name() {
        let job = QueuedJob {
            job_id: Uuid::nil(),
            source_key: "uploads/a.jpg".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["key"], "uploads/a.jpg");
        assert_eq!(value["jobId"], Uuid::nil().to_string());
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(30));
        let first = job("uploads/1");
        let second = job("uploads/2");
        queue.publish(&first).await.unwrap();
        queue.publish(&second).await.unwrap();

        assert_eq!(queue.receive().await.unwrap().unwrap().job, first);
        assert_eq!(queue.receive().await.unwrap().unwrap().job, second);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryJobQueue::new(Duration::ZERO);
        let published = job("uploads/1");
        queue.publish(&published).await.unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);

        assert_eq!(queue.requeue_expired().await.unwrap(), 1);
        let redelivered = queue.receive().await.unwrap().unwrap();
        assert_eq!(redelivered.job, published);
        assert_ne!(redelivered.receipt(), delivery.receipt());
    }

    #[tokio::test]
    async fn acked_message_is_never_redelivered() {
        let queue = InMemoryJobQueue::new(Duration::ZERO);
        queue.publish(&job("uploads/1")).await.unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        queue.ack(&delivery).await.unwrap();

        assert_eq!(queue.requeue_expired().await.unwrap(), 0);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_flight_message_is_hidden_until_deadline() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(300));
        queue.publish(&job("uploads/1")).await.unwrap();
        let _delivery = queue.receive().await.unwrap().unwrap();

        assert_eq!(queue.requeue_expired().await.unwrap(), 0);
        assert!(queue.receive().await.unwrap().is_none());
        assert_eq!(queue.in_flight().await, 1);
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let queue = InMemoryJobQueue::new(Duration::from_secs(30));
        queue.set_available(false);
        let err = queue.publish(&job("uploads/1")).await.unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
    }
}

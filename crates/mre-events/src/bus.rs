//! Lifecycle events over Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use mre_models::LifecycleEvent;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{EventError, EventResult};

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying lifecycle events
    pub stream_name: String,
    /// Consumer group of replay engine workers
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Max delivery attempts before the dead letter stream
    pub max_retries: u32,
    /// How long a delivered event may stay unacked before another worker claims it
    pub visibility_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "mre:lifecycle".to_string(),
            consumer_group: "mre:replay-engine".to_string(),
            dlq_stream_name: "mre:lifecycle:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(900),
        }
    }
}

impl EventBusConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("EVENT_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("EVENT_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("EVENT_DLQ_STREAM")
                .unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("EVENT_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: std::env::var("EVENT_VISIBILITY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        }
    }
}

/// An event handed to this consumer, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub event: LifecycleEvent,
}

/// Fire-and-forget notification of downstream stages.
///
/// Delivery is at-least-once; consumers must be idempotent.
#[async_trait]
pub trait LifecycleEventBus: Send + Sync {
    /// Publish an event, returning its bus-assigned id.
    async fn publish(&self, event: &LifecycleEvent) -> EventResult<String>;
}

/// Lifecycle event bus backed by a Redis stream and consumer group.
pub struct RedisEventBus {
    client: redis::Client,
    config: EventBusConfig,
}

impl RedisEventBus {
    /// Create a new bus client.
    pub fn new(config: EventBusConfig) -> EventResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> EventResult<Self> {
        Self::new(EventBusConfig::from_env())
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    async fn connection(&self) -> EventResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventError::connection_failed(e.to_string()))
    }

    /// Create the consumer group if it does not exist yet.
    pub async fn init(&self) -> EventResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(EventError::Redis(e)),
        }

        Ok(())
    }

    /// Acknowledge and delete a delivered event.
    pub async fn ack(&self, message_id: &str) -> EventResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        let retry_key = self.retry_key(message_id);
        conn.del::<_, ()>(&retry_key).await?;

        debug!("Acknowledged event: {}", message_id);
        Ok(())
    }

    /// Move a delivered event to the dead letter stream.
    pub async fn dlq(&self, delivery: &Delivery, error: &str) -> EventResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&delivery.event)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;

        warn!(
            event_id = %delivery.event.event_id,
            state = %delivery.event.state,
            "Moved lifecycle event to DLQ: {}",
            error
        );
        Ok(())
    }

    /// Read new events for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> EventResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                if let Some(delivery) = self.decode_entry(entry.id, &entry.map).await {
                    deliveries.push(delivery);
                }
            }
        }

        Ok(deliveries)
    }

    /// Claim events left unacked by crashed or timed-out consumers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> EventResult<Vec<Delivery>> {
        let mut conn = self.connection().await?;

        let pending: redis::streams::StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let stale: Vec<&str> = pending
            .ids
            .iter()
            .filter(|p| p.last_delivered_ms as u64 >= min_idle_ms)
            .map(|p| p.id.as_str())
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let reply: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg(&stale)
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        for entry in reply.ids {
            if let Some(delivery) = self.decode_entry(entry.id, &entry.map).await {
                info!(event_id = %delivery.event.event_id, "Claimed pending lifecycle event");
                deliveries.push(delivery);
            }
        }

        Ok(deliveries)
    }

    /// Decode a stream entry; malformed payloads are acked and dropped.
    async fn decode_entry(
        &self,
        message_id: String,
        fields: &std::collections::HashMap<String, redis::Value>,
    ) -> Option<Delivery> {
        let payload = match fields.get("event") {
            Some(redis::Value::BulkString(bytes)) => bytes,
            _ => {
                warn!(message_id = %message_id, "Stream entry without event payload");
                self.ack(&message_id).await.ok();
                return None;
            }
        };

        match serde_json::from_slice::<LifecycleEvent>(payload) {
            Ok(event) => {
                debug!(event_id = %event.event_id, state = %event.state, "Consumed lifecycle event");
                Some(Delivery { message_id, event })
            }
            Err(e) => {
                warn!(message_id = %message_id, "Failed to parse lifecycle event: {}", e);
                self.ack(&message_id).await.ok();
                None
            }
        }
    }

    fn retry_key(&self, message_id: &str) -> String {
        format!("{}:retry:{}", self.config.stream_name, message_id)
    }

    /// Increment the delivery attempt counter of an event.
    pub async fn increment_retry(&self, message_id: &str) -> EventResult<u32> {
        let mut conn = self.connection().await?;
        let key = self.retry_key(message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Number of events waiting in the stream.
    pub async fn len(&self) -> EventResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    /// Number of dead-lettered events.
    pub async fn dlq_len(&self) -> EventResult<u64> {
        let mut conn = self.connection().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }
}

#[async_trait]
impl LifecycleEventBus for RedisEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> EventResult<String> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(event)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .arg("detail_type")
            .arg(&event.detail_type)
            .arg("state")
            .arg(event.state.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| EventError::publish_failed(e.to_string()))?;

        info!(
            program = %event.program,
            event = %event.event,
            state = %event.state,
            message_id = %message_id,
            "Published lifecycle event"
        );
        Ok(message_id)
    }
}

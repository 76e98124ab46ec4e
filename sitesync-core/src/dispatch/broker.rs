use std::fmt;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use super::{CeleryMessage, DispatchError, DispatchMessage, DispatchSink};
use crate::config::BrokerSettings;

/// Celery producer backed by a Redis list.
#[derive(Clone)]
pub struct RedisCelerySink {
    conn: ConnectionManager,
    queue: String,
    task_name: String,
}

impl fmt::Debug for RedisCelerySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCelerySink")
            .field("connection", &"ConnectionManager")
            .field("queue", &self.queue)
            .field("task_name", &self.task_name)
            .finish()
    }
}

impl RedisCelerySink {
    pub async fn connect(settings: &BrokerSettings) -> Result<Self, DispatchError> {
        info!(target: "sync::dispatch", broker = %settings.redacted_url(), queue = %settings.queue, "connecting to task broker");

        let client = redis::Client::open(settings.url.as_str()).map_err(|e| {
            DispatchError::Connection(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            DispatchError::Connection(format!("Failed to connect to Redis: {e}"))
        })?;

        info!(target: "sync::dispatch", "connected to task broker");

        Ok(Self {
            conn,
            queue: settings.queue.clone(),
            task_name: settings.task_name.clone(),
        })
    }
}

#[async_trait]
impl DispatchSink for RedisCelerySink {
    async fn enqueue(&self, message: &DispatchMessage) -> Result<(), DispatchError> {
        let envelope = CeleryMessage::for_job(&self.task_name, &self.queue, message)?;
        let payload = envelope.to_payload()?;

        let mut conn = self.conn.clone();
        let depth: i64 = conn
            .lpush(&self.queue, payload.as_str())
            .await
            .map_err(|e| DispatchError::Broker(format!("Redis LPUSH failed: {e}")))?;

        debug!(
            target: "sync::dispatch",
            record = %message.record_id,
            task_id = %envelope.task_id(),
            queue_depth = depth,
            "job enqueued"
        );

        Ok(())
    }
}

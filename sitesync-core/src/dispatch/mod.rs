//! Hand-off of decrypted website jobs to the task queue.

pub mod broker;
pub mod celery;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::catalog::RecordId;

pub use broker::RedisCelerySink;
pub use celery::CeleryMessage;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("broker rejected the job: {0}")]
    Broker(String),

    #[error("failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A ready-to-process website job. Only lives between decryption and
/// enqueue.
pub struct DispatchMessage {
    pub record_id: RecordId,
    pub url: String,
    pub credential: Zeroizing<String>,
}

impl fmt::Debug for DispatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchMessage")
            .field("record_id", &self.record_id)
            .field("url", &self.url)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Fire-and-forget job submission. Implementations must be safe to call
/// from many workers at once.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn enqueue(&self, message: &DispatchMessage) -> Result<(), DispatchError>;
}

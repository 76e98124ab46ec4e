use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::Zeroizing;

use crate::error::{Result, SyncError};

pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379/0";
pub const DEFAULT_BROKER_QUEUE: &str = "celery";
pub const DEFAULT_TASK_NAME: &str = "dupman.website.fetch";

/// Knobs that tune a single sync pass.
///
/// Every field has a default so a config file only needs to mention the
/// values it wants to change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of worker tasks decrypting and dispatching records.
    pub worker_concurrency: usize,
    /// Records that may wait for a worker before the paging loop blocks.
    pub queue_capacity: usize,
    /// Total attempts per page before the page is skipped.
    pub page_fetch_attempts: u16,
    /// Pause between attempts of the same page (milliseconds).
    pub page_retry_delay_ms: u64,
    /// Upper bound for a single page request (milliseconds).
    pub fetch_timeout_ms: u64,
    /// Upper bound for decrypting and enqueueing one record (milliseconds).
    pub record_timeout_ms: u64,
    /// Optional wall-clock limit for the whole pass (seconds).
    pub run_timeout_secs: Option<u64>,
    /// Modulus size of the ephemeral RSA key pair.
    pub rsa_key_bits: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 16,
            queue_capacity: 256,
            page_fetch_attempts: 3,
            page_retry_delay_ms: 1_000,
            fetch_timeout_ms: 30_000,
            record_timeout_ms: 30_000,
            run_timeout_secs: None,
            rsa_key_bits: 2048,
        }
    }
}

impl SyncConfig {
    pub fn page_retry_delay(&self) -> Duration {
        Duration::from_millis(self.page_retry_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn record_timeout(&self) -> Duration {
        Duration::from_millis(self.record_timeout_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Rejects values that would stall the pass before it starts.
    pub fn validate(&self) -> Result<()> {
        if self.worker_concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.page_fetch_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "page_fetch_attempts must be at least 1".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 || self.record_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Where the catalog lives and who we authenticate as.
#[derive(Clone)]
pub struct CatalogSettings {
    pub url: Url,
    pub username: String,
    pub password: Zeroizing<String>,
}

impl fmt::Debug for CatalogSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogSettings")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Task queue broker connection and routing.
#[derive(Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub queue: String,
    pub task_name: String,
}

impl BrokerSettings {
    /// Broker URL with any embedded password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut parsed) if parsed.password().is_some() => {
                let _ = parsed.set_password(Some("***"));
                parsed.to_string()
            }
            Ok(parsed) => parsed.to_string(),
            Err(_) => "<unparseable>".to_string(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            queue: DEFAULT_BROKER_QUEUE.to_string(),
            task_name: DEFAULT_TASK_NAME.to_string(),
        }
    }
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("url", &self.redacted_url())
            .field("queue", &self.queue)
            .field("task_name", &self.task_name)
            .finish()
    }
}

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rsa::{Oaep, RsaPublicKey, pkcs8::DecodePublicKey, rand_core::OsRng};
use sha2::Sha256;
use sitesync_core::{
    catalog::{CatalogFetcher, FetchError, Page, Record, RecordId},
    config::SyncConfig,
    dispatch::{DispatchError, DispatchMessage, DispatchSink},
    keys::{KeyGenerationError, KeyPair, KeyProvider},
};
use tokio_util::sync::CancellationToken;

/// Credential value that the catalog will send unsealed, so decryption fails.
pub const GARBAGE: &str = "<garbage>";

pub fn test_config() -> SyncConfig {
    SyncConfig {
        worker_concurrency: 4,
        queue_capacity: 8,
        page_fetch_attempts: 1,
        page_retry_delay_ms: 10,
        fetch_timeout_ms: 5_000,
        record_timeout_ms: 5_000,
        run_timeout_secs: None,
        rsa_key_bits: 1024,
    }
}

/// In-memory catalog that seals each credential with whatever public key it
/// is handed, like the real one.
#[derive(Default)]
pub struct ScriptedCatalog {
    total_pages: u32,
    pages: HashMap<u32, Vec<(String, String)>>,
    failures: Mutex<HashMap<u32, u32>>,
    stalls: HashMap<u32, Duration>,
    cancel_on: Option<(u32, CancellationToken)>,
    calls: Mutex<Vec<u32>>,
}

impl ScriptedCatalog {
    pub fn new(total_pages: u32) -> Self {
        Self {
            total_pages,
            ..Self::default()
        }
    }

    /// Fills every page with `per_page` records named `p{page}-r{n}`.
    pub fn uniform(total_pages: u32, per_page: usize) -> Self {
        let mut catalog = Self::new(total_pages);
        for page in 1..=total_pages {
            let records = (0..per_page)
                .map(|n| (format!("p{page}-r{n}"), format!("secret-{page}-{n}")))
                .collect();
            catalog.pages.insert(page, records);
        }
        catalog
    }

    pub fn page(mut self, page: u32, records: &[(&str, &str)]) -> Self {
        self.pages.insert(
            page,
            records
                .iter()
                .map(|(id, secret)| (id.to_string(), secret.to_string()))
                .collect(),
        );
        self
    }

    pub fn failing(self, page: u32, times: u32) -> Self {
        self.failures.lock().unwrap().insert(page, times);
        self
    }

    pub fn stalling(mut self, page: u32, for_: Duration) -> Self {
        self.stalls.insert(page, for_);
        self
    }

    pub fn cancel_on(mut self, page: u32, token: CancellationToken) -> Self {
        self.cancel_on = Some((page, token));
        self
    }

    pub fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogFetcher for ScriptedCatalog {
    async fn fetch_page(&self, public_key_pem: &str, page: u32) -> Result<Page, FetchError> {
        self.calls.lock().unwrap().push(page);

        if let Some((trigger, token)) = &self.cancel_on
            && *trigger == page
        {
            token.cancel();
        }

        if let Some(stall) = self.stalls.get(&page) {
            tokio::time::sleep(*stall).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&page)
                && *left > 0
            {
                *left -= 1;
                return Err(FetchError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
        }

        let public = RsaPublicKey::from_public_key_pem(public_key_pem).unwrap();
        let records = self
            .pages
            .get(&page)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, secret)| Record {
                        id: RecordId(id.clone()),
                        url: format!("https://{id}.example"),
                        encrypted_credential: seal(&public, secret),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Page {
            records,
            page_number: page,
            total_pages: self.total_pages,
        })
    }
}

fn seal(public: &RsaPublicKey, secret: &str) -> String {
    if secret == GARBAGE {
        return "bm90IGEgY2lwaGVydGV4dA==".into();
    }
    let sealed = public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), secret.as_bytes())
        .unwrap();
    STANDARD.encode(sealed)
}

/// Sink that remembers what it was given.
#[derive(Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<(String, String, String)>>,
    delays: HashMap<String, Duration>,
    late_replies: HashMap<String, Duration>,
}

impl RecordingSink {
    pub fn delaying(mut self, record_id: &str, for_: Duration) -> Self {
        self.delays.insert(record_id.to_string(), for_);
        self
    }

    /// Accepts the job, then holds the reply back.
    pub fn replying_late(mut self, record_id: &str, for_: Duration) -> Self {
        self.late_replies.insert(record_id.to_string(), for_);
        self
    }

    pub fn seen(&self) -> Vec<(String, String, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seen().into_iter().map(|(id, _, _)| id).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DispatchSink for RecordingSink {
    async fn enqueue(&self, message: &DispatchMessage) -> Result<(), DispatchError> {
        if let Some(delay) = self.delays.get(&message.record_id.0) {
            tokio::time::sleep(*delay).await;
        }
        self.seen.lock().unwrap().push((
            message.record_id.0.clone(),
            message.url.clone(),
            message.credential.to_string(),
        ));
        if let Some(delay) = self.late_replies.get(&message.record_id.0) {
            tokio::time::sleep(*delay).await;
        }
        Ok(())
    }
}

pub struct BrokenKeys;

impl KeyProvider for BrokenKeys {
    fn generate(&self) -> Result<KeyPair, KeyGenerationError> {
        Err(KeyGenerationError::Encoding("entropy source unavailable".into()))
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

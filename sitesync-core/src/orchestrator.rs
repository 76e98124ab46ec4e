use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{CatalogFetcher, FetchError, Page},
    config::SyncConfig,
    dispatch::DispatchSink,
    error::Result,
    keys::{KeyGenerationError, KeyPair, KeyProvider},
    worker::{RecordJob, RecordWorker, WorkerPool, WorkerTally},
};

/// Lifecycle of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Paging,
    Draining,
    Done,
    Failed,
}

impl RunState {
    fn advance(&mut self, next: RunState) {
        debug!(target: "sync::orchestrator", from = %self, to = %next, "run state transition");
        *self = next;
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Paging => "paging",
            RunState::Draining => "draining",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a finished pass did. Returned only on success; skipped pages and
/// records are informational and never turn a run into a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_attempted: u32,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// Last page count reported by the catalog (1 if no page ever loaded).
    pub total_pages: u32,
    pub records_seen: u64,
    pub records: WorkerTally,
    pub cancelled: bool,
}

impl RunReport {
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[derive(Debug, Default)]
struct PagingSummary {
    attempted: u32,
    fetched: u32,
    failed: u32,
    total_pages: u32,
    records_seen: u64,
}

/// Drives a full pass: key pair, page loop, worker pool, drain.
pub struct SyncOrchestrator {
    config: SyncConfig,
    keys: Arc<dyn KeyProvider>,
    catalog: Arc<dyn CatalogFetcher>,
    sink: Arc<dyn DispatchSink>,
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.config)
            .field("keys", &"KeyProvider")
            .field("catalog", &"CatalogFetcher")
            .field("sink", &"DispatchSink")
            .finish()
    }
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        keys: Arc<dyn KeyProvider>,
        catalog: Arc<dyn CatalogFetcher>,
        sink: Arc<dyn DispatchSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            keys,
            catalog,
            sink,
        })
    }

    /// Runs one best-effort pass over the whole catalog.
    ///
    /// Only key generation can fail the run from here. The returned report
    /// is produced after every queued record has been handled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut state = RunState::Init;

        let keys = match self.generate_keys().await {
            Ok(keys) => Arc::new(keys),
            Err(err) => {
                state.advance(RunState::Failed);
                error!(target: "sync::orchestrator", error = %err, "cannot start sync without a key pair");
                return Err(err.into());
            }
        };

        let run_cancel = cancel.child_token();
        let deadline = self
            .config
            .run_timeout()
            .map(|limit| arm_deadline(limit, run_cancel.clone()));

        let worker = Arc::new(RecordWorker::new(
            Arc::clone(&keys),
            Arc::clone(&self.sink),
        ));
        let pool = WorkerPool::spawn(
            worker,
            self.config.worker_concurrency,
            self.config.queue_capacity,
            self.config.record_timeout(),
            run_cancel.clone(),
        );

        state.advance(RunState::Paging);
        let paging = self
            .page_through(keys.public_key_pem(), &pool, &run_cancel)
            .await;

        state.advance(RunState::Draining);
        let records = pool.drain().await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        state.advance(RunState::Done);
        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            pages_attempted: paging.attempted,
            pages_fetched: paging.fetched,
            pages_failed: paging.failed,
            total_pages: paging.total_pages,
            records_seen: paging.records_seen,
            records,
            cancelled: run_cancel.is_cancelled(),
        };

        info!(
            target: "sync::summary",
            pages_fetched = report.pages_fetched,
            pages_failed = report.pages_failed,
            total_pages = report.total_pages,
            records_seen = report.records_seen,
            dispatched = report.records.dispatched,
            skipped = report.records.skipped(),
            unconfirmed = report.records.unconfirmed,
            abandoned = report.records.abandoned,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed().num_milliseconds(),
            "website sync finished"
        );

        Ok(report)
    }

    async fn generate_keys(&self) -> std::result::Result<KeyPair, KeyGenerationError> {
        let provider = Arc::clone(&self.keys);
        tokio::task::spawn_blocking(move || provider.generate())
            .await
            .map_err(|err| KeyGenerationError::Interrupted(err.to_string()))?
    }

    async fn page_through(
        &self,
        public_key_pem: &str,
        pool: &WorkerPool,
        cancel: &CancellationToken,
    ) -> PagingSummary {
        let mut summary = PagingSummary::default();
        let mut current_page: u32 = 1;
        // Placeholder until the first page tells us the real count.
        let mut total_pages: u32 = 1;

        while current_page <= total_pages {
            if cancel.is_cancelled() {
                warn!(target: "sync::orchestrator", page = current_page, total_pages, "sync cancelled; stopping page iteration");
                break;
            }

            summary.attempted += 1;
            match self.fetch_with_retry(public_key_pem, current_page, cancel).await {
                Ok(page) => {
                    total_pages = page.total_pages;
                    summary.fetched += 1;
                    info!(
                        target: "sync::orchestrator",
                        page = current_page,
                        total_pages,
                        records = page.records.len(),
                        "fetched websites page"
                    );

                    let page_number = page.page_number;
                    for record in page.records {
                        summary.records_seen += 1;
                        pool.submit(RecordJob {
                            page: page_number,
                            record,
                        })
                        .await;
                    }
                }
                Err(FetchError::Cancelled) => {
                    warn!(target: "sync::orchestrator", page = current_page, "page fetch cancelled");
                    break;
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        target: "sync::orchestrator",
                        page = current_page,
                        total_pages,
                        error = %err,
                        "failed to fetch websites page; moving on"
                    );
                }
            }

            let Some(next) = current_page.checked_add(1) else {
                break;
            };
            current_page = next;
        }

        summary.total_pages = total_pages;
        summary
    }

    async fn fetch_with_retry(
        &self,
        public_key_pem: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> std::result::Result<Page, FetchError> {
        let max_attempts = self.config.page_fetch_attempts.max(1);
        let fetch_timeout = self.config.fetch_timeout();
        let mut attempt: u16 = 1;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                res = tokio::time::timeout(fetch_timeout, self.catalog.fetch_page(public_key_pem, page)) => {
                    res.unwrap_or(Err(FetchError::Timeout { after: fetch_timeout }))
                }
            };

            match result {
                Ok(page) => return Ok(page),
                Err(err) if attempt < max_attempts => {
                    warn!(
                        target: "sync::orchestrator",
                        page,
                        attempt,
                        max_attempts,
                        error = %err,
                        "page fetch failed; retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(self.config.page_retry_delay()) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn arm_deadline(limit: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                warn!(target: "sync::orchestrator", ?limit, "run timeout reached; cancelling sync");
                cancel.cancel();
            }
        }
    })
}

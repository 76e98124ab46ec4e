//! Decrypt-and-dispatch workers.
//!
//! Records are fed through a bounded channel to a fixed number of worker
//! loops. Each record runs in its own task so a panic or a hung enqueue
//! stays local to that record.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::Record,
    dispatch::{DispatchMessage, DispatchSink},
    keys::KeyPair,
};

/// Owned snapshot of one record handed to the pool.
#[derive(Debug, Clone)]
pub struct RecordJob {
    pub page: u32,
    pub record: Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Dispatched,
    DecryptFailed,
    DispatchFailed,
    TimedOut,
    /// The record timeout fired after the job was handed to the broker.
    /// The job may or may not be queued.
    Unconfirmed,
    Panicked,
}

/// Decrypts one record's credential and enqueues the resulting job.
pub struct RecordWorker {
    keys: Arc<KeyPair>,
    sink: Arc<dyn DispatchSink>,
}

impl fmt::Debug for RecordWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordWorker")
            .field("keys", &self.keys)
            .field("sink", &"DispatchSink")
            .finish()
    }
}

impl RecordWorker {
    pub fn new(keys: Arc<KeyPair>, sink: Arc<dyn DispatchSink>) -> Self {
        Self { keys, sink }
    }

    /// Never fails outward: every problem is logged and reported as an
    /// outcome for this record only.
    pub async fn process(&self, record: &Record) -> RecordOutcome {
        self.process_tracked(record, &AtomicBool::new(false)).await
    }

    /// Like [`process`](Self::process), raising `sending` right before the
    /// job goes to the sink.
    async fn process_tracked(&self, record: &Record, sending: &AtomicBool) -> RecordOutcome {
        let credential = match self.keys.decrypt_credential(&record.encrypted_credential) {
            Ok(credential) => credential,
            Err(err) => {
                warn!(
                    target: "sync::worker",
                    record = %record.id,
                    url = %record.url,
                    error = %err,
                    "failed to decrypt credential; skipping record"
                );
                return RecordOutcome::DecryptFailed;
            }
        };

        let message = DispatchMessage {
            record_id: record.id.clone(),
            url: record.url.clone(),
            credential,
        };

        sending.store(true, Ordering::Release);
        match self.sink.enqueue(&message).await {
            Ok(()) => {
                debug!(target: "sync::worker", record = %record.id, url = %record.url, "record dispatched");
                RecordOutcome::Dispatched
            }
            Err(err) => {
                warn!(
                    target: "sync::worker",
                    record = %record.id,
                    url = %record.url,
                    error = %err,
                    "failed to create job for website; skipping record"
                );
                RecordOutcome::DispatchFailed
            }
        }
    }
}

#[derive(Debug, Default)]
struct WorkerStats {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    decrypt_failed: AtomicU64,
    dispatch_failed: AtomicU64,
    timed_out: AtomicU64,
    unconfirmed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: RecordOutcome) {
        let counter = match outcome {
            RecordOutcome::Dispatched => &self.dispatched,
            RecordOutcome::DecryptFailed => &self.decrypt_failed,
            RecordOutcome::DispatchFailed => &self.dispatch_failed,
            RecordOutcome::TimedOut => &self.timed_out,
            RecordOutcome::Unconfirmed => &self.unconfirmed,
            RecordOutcome::Panicked => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerTally {
        WorkerTally {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            decrypt_failed: self.decrypt_failed.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            unconfirmed: self.unconfirmed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Per-record counts after the pool has drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTally {
    pub submitted: u64,
    pub dispatched: u64,
    pub decrypt_failed: u64,
    pub dispatch_failed: u64,
    pub timed_out: u64,
    /// Sent to the broker without a reply before the record timeout. Not
    /// skipped: the job may already be queued.
    pub unconfirmed: u64,
    pub panicked: u64,
    pub abandoned: u64,
}

impl WorkerTally {
    pub fn skipped(&self) -> u64 {
        self.decrypt_failed + self.dispatch_failed + self.timed_out + self.panicked
    }
}

/// Fixed-size pool of record workers behind a bounded queue.
pub struct WorkerPool {
    tx: mpsc::Sender<RecordJob>,
    rx: Arc<Mutex<mpsc::Receiver<RecordJob>>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .field("queue_capacity", &self.tx.max_capacity())
            .field("stats", &self.stats.snapshot())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl WorkerPool {
    pub fn spawn(
        worker: Arc<RecordWorker>,
        concurrency: usize,
        queue_capacity: usize,
        record_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<RecordJob>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(WorkerStats::default());

        let handles = (0..concurrency.max(1))
            .map(|worker_id| {
                let worker = Arc::clone(&worker);
                let rx = Arc::clone(&rx);
                let stats = Arc::clone(&stats);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut guard = rx.lock().await;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => None,
                                job = guard.recv() => job,
                            }
                        };
                        let Some(job) = job else { break };
                        let outcome = run_isolated(&worker, job, record_timeout).await;
                        stats.record(outcome);
                    }
                    debug!(target: "sync::worker", worker_id, "record worker stopped");
                })
            })
            .collect::<Vec<_>>();

        info!(
            target: "sync::worker",
            workers = handles.len(),
            queue_capacity = queue_capacity.max(1),
            "record worker pool started"
        );

        Self {
            tx,
            rx,
            handles,
            stats,
            cancel,
        }
    }

    /// Queues a record, waiting for room when the queue is full. Returns
    /// `false` when the run was cancelled first; the record is then
    /// counted as abandoned.
    pub async fn submit(&self, job: RecordJob) -> bool {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.tx.reserve() => permit.ok(),
        };

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        match permit {
            Some(permit) => {
                permit.send(job);
                true
            }
            None => {
                self.abandon(&job);
                false
            }
        }
    }

    /// Closes intake and waits for every worker to finish.
    pub async fn drain(self) -> WorkerTally {
        let Self {
            tx,
            rx,
            handles,
            stats,
            ..
        } = self;
        drop(tx);

        for result in join_all(handles).await {
            if let Err(err) = result {
                error!(target: "sync::worker", error = %err, "record worker exited abnormally");
            }
        }

        let mut leftover = rx.lock().await;
        while let Ok(job) = leftover.try_recv() {
            stats.abandoned.fetch_add(1, Ordering::Relaxed);
            warn!(target: "sync::worker", record = %job.record.id, url = %job.record.url, page = job.page, "record abandoned after cancellation");
        }

        stats.snapshot()
    }

    fn abandon(&self, job: &RecordJob) {
        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        warn!(target: "sync::worker", record = %job.record.id, url = %job.record.url, page = job.page, "record abandoned after cancellation");
    }
}

async fn run_isolated(
    worker: &Arc<RecordWorker>,
    job: RecordJob,
    record_timeout: Duration,
) -> RecordOutcome {
    let RecordJob { page, record } = job;
    let record_id = record.id.clone();
    let url = record.url.clone();

    let sending = Arc::new(AtomicBool::new(false));
    let worker = Arc::clone(worker);
    let mut task = tokio::spawn({
        let sending = Arc::clone(&sending);
        async move { worker.process_tracked(&record, &sending).await }
    });

    match tokio::time::timeout(record_timeout, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            error!(target: "sync::worker", record = %record_id, url = %url, page, error = %err, "record task failed; skipping record");
            RecordOutcome::Panicked
        }
        Err(_) if sending.load(Ordering::Acquire) => {
            task.abort();
            warn!(target: "sync::worker", record = %record_id, url = %url, page, timeout = ?record_timeout, "no broker reply before record timeout; job may already be queued");
            RecordOutcome::Unconfirmed
        }
        Err(_) => {
            task.abort();
            warn!(target: "sync::worker", record = %record_id, url = %url, page, timeout = ?record_timeout, "record timed out; skipping record");
            RecordOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RecordId;
    use crate::dispatch::DispatchError;
    use crate::keys::{KeyProvider, RsaKeyProvider};
    use async_trait::async_trait;
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use rsa::{Oaep, RsaPublicKey, pkcs8::DecodePublicKey, rand_core::OsRng};
    use sha2::Sha256;

    #[derive(Default)]
    struct CollectingSink {
        seen: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DispatchSink for CollectingSink {
        async fn enqueue(&self, message: &DispatchMessage) -> Result<(), DispatchError> {
            match message.record_id.0.as_str() {
                "slow" => tokio::time::sleep(Duration::from_secs(60)).await,
                "late-reply" => {
                    self.seen
                        .lock()
                        .unwrap()
                        .push((message.record_id.0.clone(), message.credential.to_string()));
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    return Ok(());
                }
                "explode" => panic!("sink blew up"),
                "reject" => return Err(DispatchError::Broker("queue full".into())),
                _ => {}
            }
            self.seen
                .lock()
                .unwrap()
                .push((message.record_id.0.clone(), message.credential.to_string()));
            Ok(())
        }
    }

    fn sealed_record(keys: &KeyPair, id: &str) -> Record {
        let public = RsaPublicKey::from_public_key_pem(keys.public_key_pem()).unwrap();
        let sealed = public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), format!("cred-{id}").as_bytes())
            .unwrap();
        Record {
            id: RecordId::from(id),
            url: format!("https://{id}.example"),
            encrypted_credential: STANDARD.encode(sealed),
        }
    }

    fn setup() -> (Arc<KeyPair>, Arc<CollectingSink>, Arc<RecordWorker>) {
        let keys = Arc::new(RsaKeyProvider::new(1024).generate().unwrap());
        let sink = Arc::new(CollectingSink::default());
        let worker = Arc::new(RecordWorker::new(Arc::clone(&keys), sink.clone()));
        (keys, sink, worker)
    }

    #[tokio::test]
    async fn decrypted_credential_reaches_sink() {
        let (keys, sink, worker) = setup();
        let outcome = worker.process(&sealed_record(&keys, "a")).await;

        assert_eq!(outcome, RecordOutcome::Dispatched);
        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec![("a".to_string(), "cred-a".to_string())]
        );
    }

    #[tokio::test]
    async fn undecryptable_record_is_not_dispatched() {
        let (_, sink, worker) = setup();
        let record = Record {
            id: RecordId::from("bad"),
            url: "https://bad.example".into(),
            encrypted_credential: STANDARD.encode(b"definitely not rsa"),
        };

        assert_eq!(worker.process(&record).await, RecordOutcome::DecryptFailed);
        assert!(sink.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn enqueue_failure_is_record_local() {
        let (keys, _, worker) = setup();
        let outcome = worker.process(&sealed_record(&keys, "reject")).await;
        assert_eq!(outcome, RecordOutcome::DispatchFailed);
    }

    #[tokio::test]
    async fn pool_isolates_slow_and_panicking_records() {
        let (keys, sink, worker) = setup();
        let pool = WorkerPool::spawn(
            worker,
            2,
            4,
            Duration::from_millis(200),
            CancellationToken::new(),
        );

        for id in ["one", "slow", "explode", "two", "three"] {
            assert!(pool.submit(RecordJob { page: 1, record: sealed_record(&keys, id) }).await);
        }
        let tally = pool.drain().await;

        assert_eq!(tally.submitted, 5);
        assert_eq!(tally.dispatched, 3);
        assert_eq!(tally.unconfirmed, 1);
        assert_eq!(tally.timed_out, 0);
        assert_eq!(tally.panicked, 1);
        assert_eq!(tally.skipped(), 1);

        let mut ids: Vec<_> = sink.seen.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn late_broker_reply_is_not_reported_as_skipped() {
        let (keys, sink, worker) = setup();
        let pool = WorkerPool::spawn(
            worker,
            1,
            4,
            Duration::from_millis(300),
            CancellationToken::new(),
        );

        assert!(pool.submit(RecordJob { page: 1, record: sealed_record(&keys, "late-reply") }).await);
        let tally = pool.drain().await;

        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        assert_eq!(tally.unconfirmed, 1);
        assert_eq!(tally.timed_out, 0);
        assert_eq!(tally.skipped(), 0);
    }

    #[tokio::test]
    async fn cancelled_pool_accounts_for_every_record() {
        let (keys, _, worker) = setup();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(worker, 1, 8, Duration::from_secs(5), cancel.clone());

        cancel.cancel();
        for id in ["a", "b", "c"] {
            pool.submit(RecordJob { page: 3, record: sealed_record(&keys, id) }).await;
        }
        let tally = pool.drain().await;

        assert_eq!(tally.submitted, 3);
        assert_eq!(
            tally.dispatched + tally.unconfirmed + tally.skipped() + tally.abandoned,
            3
        );
        assert_eq!(tally.abandoned, 3);
    }
}

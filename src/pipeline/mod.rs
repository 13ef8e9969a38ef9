//! # Processing Pipeline
//!
//! ```text
//! requests ──> fetch tasks (async, ≤ max_concurrent_downloads)
//!                 │ rate limiter, one 429 retry
//!                 v
//!              decompression (blocking pool, decompression_workers)
//!                 │ bounded channel (queue_size); send waits when full
//!                 v
//!              processing workers (threads, processing_workers)
//!                 │ decode → filter → SubmissionSink
//!                 v
//!              loose directories | batch archives
//! ```
//!
//! A fetch keeps its download slot until its body is in the channel, so
//! when decoding or persistence falls behind, downloads stop too. At most
//! `max_concurrent_downloads + queue_size + processing_workers` bodies are
//! in memory at once.
//!
//! Per-item failures go to the error ledger and never stop siblings. A
//! fatal storage error stops new fetches; items already queued are drained
//! without being persisted, and `run()` returns `PipelineError::Fatal`.
//!
//! Shutdown order: all fetch tasks finish and drop their senders, the
//! workers drain the channel and exit, then the workers are joined.

mod errors;
mod ledger;
mod sink;

pub use errors::{ItemError, PipelineError, Stage};
pub use ledger::{ErrorLedger, LEDGER_FILE};
pub use sink::{ArchiveSink, LooseSink, SubmissionSink};

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::mpsc::{channel, unbounded_channel, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::accession::Accession;
use crate::archive::{recover, ContainerReader};
use crate::codec::Compression;
use crate::config::{IngestConfig, PersistMode};
use crate::fetch::{FetchClient, HttpTransport, Transport};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, RunSummary};
use crate::sgml::{decode_submission, DecodeOptions};
use crate::storage::{LooseStore, StoredSubmission};

/// One identifier to download
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub accession: Accession,
    /// Source is served as `.sgml.zst`
    pub compressed: bool,
}

impl FetchRequest {
    pub fn new(accession: Accession, compressed: bool) -> Self {
        Self {
            accession,
            compressed,
        }
    }
}

/// Progress notifications, in completion order
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Fetched { accession: Accession, bytes: u64 },
    RateLimited { accession: Accession },
    Persisted { accession: Accession, documents: usize },
    Failed { accession: Accession, stage: Stage, reason: String },
    Finished(RunSummary),
}

/// Drop requests whose accession is already on disk, loose or archived.
///
/// An archive left open by an interrupted run is recovered first, so only
/// committed submissions count as archived. Must not be called while a
/// writer is open on `output_dir`.
pub fn pending_requests(requests: Vec<FetchRequest>, output_dir: &Path) -> Result<Vec<FetchRequest>, PipelineError> {
    let loose = LooseStore::new(output_dir);
    recover(output_dir, &loose)?;
    let archived: HashSet<Accession> = ContainerReader::new(output_dir)
        .accessions()?
        .into_iter()
        .collect();

    let mut seen = HashSet::new();
    Ok(requests
        .into_iter()
        .filter(|r| !archived.contains(&r.accession) && !loose.contains(&r.accession))
        .filter(|r| seen.insert(r.accession.clone()))
        .collect())
}

struct DecodeJob {
    accession: Accession,
    payload: Vec<u8>,
}

/// State shared by fetch tasks and processing workers
struct Shared {
    sink: Arc<dyn SubmissionSink>,
    ledger: Arc<ErrorLedger>,
    metrics: Arc<MetricsRegistry>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<PipelineEvent>>>>,
    options: DecodeOptions,
    keep_types: Option<Vec<String>>,
    stopped: AtomicBool,
    fatal: Mutex<Option<(Accession, String)>>,
}

impl Shared {
    fn emit(&self, event: PipelineEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn succeed(&self, accession: &Accession, documents: usize) {
        self.metrics.increment_persisted();
        if let Err(e) = self.ledger.resolve(accession) {
            log_event_with_fields(
                Event::LedgerWriteFailed,
                &[("accession", accession.no_dash()), ("reason", &e.to_string())],
            );
        }
        log_event_with_fields(
            Event::SubmissionPersisted,
            &[
                ("accession", accession.no_dash()),
                ("documents", &documents.to_string()),
            ],
        );
        self.emit(PipelineEvent::Persisted {
            accession: accession.clone(),
            documents,
        });
    }

    fn fail(&self, accession: &Accession, error: ItemError) {
        let event = match error.stage() {
            Stage::Fetch => Event::FetchFailed,
            Stage::Decompress => Event::DecompressionFailed,
            Stage::Decode => Event::DecodeFailed,
            Stage::Persist if error.is_fatal() => Event::ArchiveWriteFailed,
            Stage::Persist => Event::PersistFailed,
        };
        let reason = error.to_string();

        self.metrics.increment_failed();
        log_event_with_fields(
            event,
            &[
                ("accession", accession.no_dash()),
                ("reason", reason.as_str()),
                ("stage", error.stage().as_str()),
            ],
        );
        if let Err(e) = self.ledger.record(accession, &reason) {
            log_event_with_fields(
                Event::LedgerWriteFailed,
                &[("accession", accession.no_dash()), ("reason", &e.to_string())],
            );
        }

        if error.is_fatal() {
            self.stopped.store(true, Ordering::SeqCst);
            let mut fatal = self.fatal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if fatal.is_none() {
                *fatal = Some((accession.clone(), reason.clone()));
            }
        }

        self.emit(PipelineEvent::Failed {
            accession: accession.clone(),
            stage: error.stage(),
            reason,
        });
    }

    /// Decode, filter and persist one payload
    fn process(&self, job: DecodeJob) -> Result<usize, ItemError> {
        let mut submission = decode_submission(&job.payload, Some(job.accession), self.options)?;
        if let Some(types) = &self.keep_types {
            submission.retain_types(types);
        }
        self.metrics.increment_decoded();

        let stored = StoredSubmission::from_submission(submission);
        let documents = stored.contents.len();
        self.sink.persist(stored)?;
        Ok(documents)
    }
}

fn worker_loop(jobs: Arc<Mutex<Receiver<DecodeJob>>>, shared: Arc<Shared>) {
    loop {
        let next = jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .blocking_recv();
        // None once every sender is gone and the channel is empty
        let Some(job) = next else {
            return;
        };
        // After a fatal error the channel is drained without persisting.
        if shared.is_stopped() {
            continue;
        }

        let accession = job.accession.clone();
        match shared.process(job) {
            Ok(documents) => shared.succeed(&accession, documents),
            Err(e) => shared.fail(&accession, e),
        }
    }
}

pub struct ProcessingPipeline {
    config: IngestConfig,
    client: Arc<FetchClient>,
    sink: Arc<dyn SubmissionSink>,
    ledger: Arc<ErrorLedger>,
    metrics: Arc<MetricsRegistry>,
    subscribers: Arc<Mutex<Vec<UnboundedSender<PipelineEvent>>>>,
}

impl ProcessingPipeline {
    /// Pipeline over the real network
    pub fn new(config: IngestConfig) -> Result<Self, PipelineError> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: IngestConfig, transport: Arc<dyn Transport>) -> Result<Self, PipelineError> {
        config.validate()?;
        let limiter = Arc::new(config.rate_limit.build()?);
        let metrics = Arc::new(MetricsRegistry::new());

        let output_dir = &config.output_dir;
        std::fs::create_dir_all(output_dir)
            .map_err(|e| PipelineError::Setup(format!("{}: {}", output_dir.display(), e)))?;
        let ledger = Arc::new(ErrorLedger::in_dir(output_dir)?);

        let loose = LooseStore::new(output_dir);
        loose.cleanup_partial()?;
        let sink: Arc<dyn SubmissionSink> = match config.persist {
            PersistMode::Loose => Arc::new(LooseSink::new(loose, metrics.clone())),
            PersistMode::Archive => Arc::new(ArchiveSink::open(
                output_dir,
                config.archive.clone(),
                metrics.clone(),
            )?),
        };

        let client = Arc::new(FetchClient::new(
            transport,
            limiter,
            config.max_concurrent_downloads,
            config.base_url.clone(),
            config.chunk_size,
            metrics.clone(),
        ));

        Ok(Self {
            config,
            client,
            sink,
            ledger,
            metrics,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    /// Replace the sink chosen from the configuration
    pub fn with_sink(mut self, sink: Arc<dyn SubmissionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Receive every event from now on. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Fetch, decode and persist every request.
    ///
    /// Per-item failures are recorded in the ledger and counted in the
    /// summary. Only a fatal storage error makes this return `Err`.
    pub async fn run(&self, requests: Vec<FetchRequest>) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let requested = requests.len() as u64;
        log_event_with_fields(
            Event::RunStart,
            &[
                ("persist", match self.config.persist {
                    PersistMode::Loose => "loose",
                    PersistMode::Archive => "archive",
                }),
                ("requests", &requested.to_string()),
            ],
        );

        let shared = Arc::new(Shared {
            sink: self.sink.clone(),
            ledger: self.ledger.clone(),
            metrics: self.metrics.clone(),
            subscribers: self.subscribers.clone(),
            options: DecodeOptions {
                lenient: self.config.lenient_decoding,
            },
            keep_types: self.config.keep_document_types.clone(),
            stopped: AtomicBool::new(false),
            fatal: Mutex::new(None),
        });
        let (jobs, receiver) = channel(self.config.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.processing_workers);
        for i in 0..self.config.processing_workers {
            let receiver = receiver.clone();
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("sgmlvault-worker-{}", i))
                .spawn(move || worker_loop(receiver, shared))
                .map_err(|e| PipelineError::Worker(e.to_string()))?;
            workers.push(handle);
        }

        let decompress_slots = Arc::new(Semaphore::new(self.config.decompression_workers));
        let mut tasks = JoinSet::new();
        for request in requests {
            tasks.spawn(fetch_one(
                request,
                self.client.clone(),
                jobs.clone(),
                decompress_slots.clone(),
                shared.clone(),
            ));
        }
        drop(jobs);
        drop(receiver);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log_event_with_fields(Event::FetchFailed, &[("reason", &e.to_string())]);
            }
        }

        let panicked = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(|handle| handle.join())
                .filter(Result::is_err)
                .count()
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?;
        if panicked > 0 {
            return Err(PipelineError::Worker(format!("{} processing workers panicked", panicked)));
        }

        let fatal = shared
            .fatal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((accession, reason)) = fatal {
            // The writer is unusable; its marker lets the next run recover.
            log_event_with_fields(
                Event::RunAborted,
                &[("accession", accession.no_dash()), ("reason", reason.as_str())],
            );
            return Err(PipelineError::Fatal {
                accession: accession.to_string(),
                reason,
            });
        }

        if let Err(e) = self.sink.finish() {
            let reason = e.to_string();
            log_event_with_fields(Event::RunAborted, &[("reason", reason.as_str())]);
            return Err(PipelineError::Fatal {
                accession: String::new(),
                reason,
            });
        }

        let summary = RunSummary::new(requested, started.elapsed(), self.metrics.snapshot());
        log_event_with_fields(
            Event::RunComplete,
            &[
                ("elapsed_secs", &format!("{:.3}", summary.elapsed_secs)),
                ("failed", &summary.failed.to_string()),
                ("succeeded", &summary.succeeded.to_string()),
            ],
        );
        shared.emit(PipelineEvent::Finished(summary.clone()));
        Ok(summary)
    }
}

async fn fetch_one(
    request: FetchRequest,
    client: Arc<FetchClient>,
    jobs: Sender<DecodeJob>,
    decompress_slots: Arc<Semaphore>,
    shared: Arc<Shared>,
) {
    if shared.is_stopped() {
        return;
    }
    let FetchRequest {
        accession,
        compressed,
    } = request;

    // Held until the payload is in the channel.
    let _download = match client.slot().await {
        Ok(slot) => slot,
        Err(e) => {
            shared.fail(&accession, ItemError::from(e));
            return;
        }
    };
    if shared.is_stopped() {
        return;
    }

    let fetched = match client.download(&accession, compressed).await {
        Ok(fetched) => fetched,
        Err(e) => {
            if matches!(e, crate::fetch::FetchError::RateLimited { .. }) {
                shared.emit(PipelineEvent::RateLimited {
                    accession: accession.clone(),
                });
            }
            shared.fail(&accession, ItemError::from(e));
            return;
        }
    };

    shared.metrics.increment_fetched();
    if fetched.retried {
        shared.emit(PipelineEvent::RateLimited {
            accession: accession.clone(),
        });
    }
    shared.emit(PipelineEvent::Fetched {
        accession: accession.clone(),
        bytes: fetched.body.len() as u64,
    });

    let payload = if compressed {
        match decompress(fetched.body, &decompress_slots).await {
            Ok(payload) => payload,
            Err(e) => {
                shared.fail(&accession, e);
                return;
            }
        }
    } else {
        fetched.body
    };

    if shared.is_stopped() {
        return;
    }
    let job = DecodeJob {
        accession: accession.clone(),
        payload,
    };
    if jobs.send(job).await.is_err() {
        shared.fail(
            &accession,
            ItemError::Storage {
                message: "Processing workers are gone".to_string(),
                fatal: true,
            },
        );
    }
}

/// zstd-decompress on the blocking pool, within one of the decompression slots
async fn decompress(body: Vec<u8>, slots: &Semaphore) -> Result<Vec<u8>, ItemError> {
    let _slot = slots
        .acquire()
        .await
        .map_err(|e| ItemError::Decompression(e.to_string()))?;
    tokio::task::spawn_blocking(move || Compression::Zstd.decompress(&body))
        .await
        .map_err(|e| ItemError::Decompression(e.to_string()))?
        .map_err(|e| ItemError::Decompression(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveMarker, ContainerWriter, TRAILER};
    use crate::config::ArchiveConfig;
    use crate::fetch::{BufferedBody, FetchResult, TransportResponse};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Condvar;
    use std::time::Duration;
    use tempfile::TempDir;

    struct MapTransport {
        bodies: HashMap<String, (u16, Vec<u8>)>,
    }

    #[async_trait]
    impl Transport for MapTransport {
        async fn get(&self, url: &str) -> FetchResult<TransportResponse> {
            let (status, body) = self.bodies.get(url).cloned().unwrap_or((404, Vec::new()));
            Ok(TransportResponse {
                status,
                body: Box::new(BufferedBody::new(body, 64)),
            })
        }
    }

    fn container(accession: &str, text: &str) -> Vec<u8> {
        format!(
            "<SUBMISSION>\n<ACCESSION-NUMBER>{}\n<TYPE>8-K\n<DOCUMENT>\n<TYPE>8-K\n<SEQUENCE>1\n<FILENAME>main.txt\n<TEXT>\n{}\n</TEXT>\n</DOCUMENT>\n</SUBMISSION>\n",
            accession, text
        )
        .into_bytes()
    }

    fn config(dir: &Path) -> IngestConfig {
        let mut config = IngestConfig::default();
        config.base_url = "mock://sgml/".into();
        config.output_dir = dir.to_path_buf();
        config.rate_limit.requests = 1000.0;
        config.processing_workers = 2;
        config.decompression_workers = 2;
        config.queue_size = 2;
        config
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ledgered() {
        let temp = TempDir::new().unwrap();
        let mut bodies = HashMap::new();
        bodies.insert(
            "mock://sgml/000000000000000001.sgml".to_string(),
            (200, container("0000000000-00-000001", "first")),
        );
        bodies.insert(
            "mock://sgml/000000000000000003.sgml".to_string(),
            (200, b"<DOCUMENT>\n<TYPE>EX\n<TEXT>\nno identity\n</TEXT>\n</DOCUMENT>\n".to_vec()),
        );
        let pipeline =
            ProcessingPipeline::with_transport(config(temp.path()), Arc::new(MapTransport { bodies }))
                .unwrap();
        let mut events = pipeline.subscribe();

        let requests = (1..=3u64)
            .map(|id| FetchRequest::new(Accession::from(id), false))
            .collect();
        let summary = pipeline.run(requests).await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);

        let failed = pipeline.ledger().failed_accessions();
        assert_eq!(failed, vec![Accession::from(2u64), Accession::from(3u64)]);
        let entries = pipeline.ledger().entries();
        assert!(entries["000000000000000002"].contains("404"));
        assert!(entries["000000000000000003"].starts_with("Decode error"));

        let loose = LooseStore::new(temp.path());
        let stored = loose.load(&Accession::from(1u64)).unwrap();
        assert_eq!(stored.contents, vec![b"first\n".to_vec()]);

        let mut finished = false;
        let mut stages = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::Failed { stage, .. } => stages.push(stage),
                PipelineEvent::Finished(_) => finished = true,
                _ => {}
            }
        }
        stages.sort_by_key(|s| s.as_str());
        assert_eq!(stages, vec![Stage::Decode, Stage::Fetch]);
        assert!(finished);
    }

    #[tokio::test]
    async fn test_success_resolves_ledger_entry() {
        let temp = TempDir::new().unwrap();
        let ledger = ErrorLedger::in_dir(temp.path()).unwrap();
        ledger.record(&Accession::from(1u64), "HTTP 503").unwrap();

        let mut bodies = HashMap::new();
        bodies.insert(
            "mock://sgml/000000000000000001.sgml.zst".to_string(),
            (200, zstd::stream::encode_all(&container("1", "ok")[..], 3).unwrap()),
        );
        let pipeline =
            ProcessingPipeline::with_transport(config(temp.path()), Arc::new(MapTransport { bodies }))
                .unwrap();
        pipeline
            .run(vec![FetchRequest::new(Accession::from(1u64), true)])
            .await
            .unwrap();

        assert!(pipeline.ledger().is_empty());
        assert!(ErrorLedger::in_dir(temp.path()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_compressed_payload() {
        let temp = TempDir::new().unwrap();
        let mut bodies = HashMap::new();
        bodies.insert(
            "mock://sgml/000000000000000004.sgml.zst".to_string(),
            (200, b"not zstd at all".to_vec()),
        );
        let pipeline =
            ProcessingPipeline::with_transport(config(temp.path()), Arc::new(MapTransport { bodies }))
                .unwrap();
        let summary = pipeline
            .run(vec![FetchRequest::new(Accession::from(4u64), true)])
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert!(pipeline.ledger().entries()["000000000000000004"].starts_with("Decompression"));
    }

    #[test]
    fn test_pending_requests_skips_persisted() {
        let temp = TempDir::new().unwrap();
        let loose = LooseStore::new(temp.path());
        let submission = crate::sgml::decode_submission(
            &container("5", "x"),
            Some(Accession::from(5u64)),
            DecodeOptions::default(),
        )
        .unwrap();
        loose.save(&StoredSubmission::from_submission(submission)).unwrap();

        let requests = vec![
            FetchRequest::new(Accession::from(5u64), false),
            FetchRequest::new(Accession::from(6u64), false),
            FetchRequest::new(Accession::from(6u64), true),
        ];
        let pending = pending_requests(requests, temp.path()).unwrap();
        assert_eq!(pending, vec![FetchRequest::new(Accession::from(6u64), false)]);
    }

    /// Serves the same container for every URL and counts requests
    #[derive(Default)]
    struct CountingTransport {
        gets: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn get(&self, _url: &str) -> FetchResult<TransportResponse> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse {
                status: 200,
                body: Box::new(BufferedBody::new(container("1", "body"), 64)),
            })
        }
    }

    /// Blocks every persist until released
    #[derive(Default)]
    struct GatedSink {
        open: Mutex<bool>,
        opened: Condvar,
        persisted: AtomicUsize,
    }

    impl GatedSink {
        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    impl SubmissionSink for GatedSink {
        fn persist(&self, submission: StoredSubmission) -> Result<PathBuf, ItemError> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
            self.persisted.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(submission.accession().no_dash()))
        }

        fn finish(&self) -> Result<Vec<PathBuf>, ItemError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_sink_stalls_downloads() {
        let temp = TempDir::new().unwrap();
        let mut config = config(temp.path());
        config.max_concurrent_downloads = 2;
        config.queue_size = 1;
        config.decompression_workers = 1;
        config.processing_workers = 1;

        let transport = Arc::new(CountingTransport::default());
        let sink = Arc::new(GatedSink::default());
        let pipeline = Arc::new(
            ProcessingPipeline::with_transport(config, transport.clone())
                .unwrap()
                .with_sink(sink.clone()),
        );

        let requests: Vec<_> = (1..=200u64)
            .map(|id| FetchRequest::new(Accession::from(id), false))
            .collect();
        let run = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(requests).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        // Two download slots, one channel slot, one item stuck in persist
        let fetched = transport.gets.load(Ordering::SeqCst);
        assert!(fetched <= 4, "{} bodies fetched while persistence stalled", fetched);
        assert_eq!(sink.persisted.load(Ordering::SeqCst), 0);

        sink.release();
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.succeeded, 200);
        assert_eq!(transport.gets.load(Ordering::SeqCst), 200);
        assert_eq!(sink.persisted.load(Ordering::SeqCst), 200);
    }

    /// Archives the first submission, then fails like a dead disk
    struct DiskFailsAfterFirst {
        archive: ArchiveSink,
        calls: AtomicUsize,
    }

    impl SubmissionSink for DiskFailsAfterFirst {
        fn persist(&self, submission: StoredSubmission) -> Result<PathBuf, ItemError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return self.archive.persist(submission);
            }
            Err(ItemError::Storage {
                message: "No space left on device".to_string(),
                fatal: true,
            })
        }

        fn finish(&self) -> Result<Vec<PathBuf>, ItemError> {
            self.archive.finish()
        }
    }

    #[tokio::test]
    async fn test_fatal_storage_error_stops_run() {
        let temp = TempDir::new().unwrap();
        let mut config = config(temp.path());
        config.max_concurrent_downloads = 1;
        config.queue_size = 1;
        config.processing_workers = 1;

        let sink = Arc::new(DiskFailsAfterFirst {
            archive: ArchiveSink::open(
                temp.path(),
                ArchiveConfig::default(),
                Arc::new(MetricsRegistry::new()),
            )
            .unwrap(),
            calls: AtomicUsize::new(0),
        });
        let transport = Arc::new(CountingTransport::default());
        let pipeline = ProcessingPipeline::with_transport(config, transport.clone())
            .unwrap()
            .with_sink(sink.clone());

        let requests: Vec<_> = (1..=20u64)
            .map(|id| FetchRequest::new(Accession::from(id), false))
            .collect();
        let err = pipeline.run(requests.clone()).await.unwrap_err();
        let PipelineError::Fatal { accession, reason } = err else {
            panic!("expected a fatal error, got {:?}", err);
        };
        assert!(reason.contains("No space left on device"));

        // Nothing queued after the failure reached the sink, and no new
        // downloads started.
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert!(transport.gets.load(Ordering::SeqCst) <= 5);

        let entries = pipeline.ledger().entries();
        assert_eq!(entries.len(), 1);
        let failed = Accession::parse(&accession).unwrap();
        assert!(entries.contains_key(failed.no_dash()));

        // The open archive keeps its marker for the next run.
        let marker = ArchiveMarker::read(temp.path()).unwrap().unwrap();
        assert_eq!(marker.committed.len(), 1);
        let archived = marker.committed[0].clone();
        assert_ne!(archived, failed);

        drop(pipeline);
        drop(sink);
        let pending = pending_requests(requests, temp.path()).unwrap();
        assert_eq!(pending.len(), 19);
        assert!(pending.iter().all(|r| r.accession != archived));
        assert_eq!(
            ContainerReader::new(temp.path()).accessions().unwrap(),
            vec![archived]
        );
    }

    fn raw_header(path: &str, size: u64) -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_cksum();
        header
    }

    #[test]
    fn test_pending_requests_after_interrupted_archive() {
        let temp = TempDir::new().unwrap();
        let submission = crate::sgml::decode_submission(
            &container("1", "committed"),
            Some(Accession::from(1u64)),
            DecodeOptions::default(),
        )
        .unwrap();

        let mut writer = ContainerWriter::open(temp.path(), ArchiveConfig::default()).unwrap();
        let archive = writer
            .append(StoredSubmission::from_submission(submission))
            .unwrap();
        let committed_len = ArchiveMarker::read(temp.path()).unwrap().unwrap().committed_len;
        // Crash: never sealed
        std::mem::forget(writer);

        let mut file = OpenOptions::new().append(true).open(&archive).unwrap();
        // Complete metadata entry whose commit never happened
        file.write_all(raw_header("000000000000000002/metadata.json", 2).as_bytes())
            .unwrap();
        file.write_all(b"{}").unwrap();
        file.write_all(&[0u8; 510]).unwrap();
        // Torn entry
        file.write_all(raw_header("000000000000000003/metadata.json", 4000).as_bytes())
            .unwrap();
        file.write_all(&[0xAB; 700]).unwrap();
        drop(file);

        let requests: Vec<_> = (1..=3u64)
            .map(|id| FetchRequest::new(Accession::from(id), false))
            .collect();
        let pending = pending_requests(requests, temp.path()).unwrap();
        assert_eq!(
            pending,
            vec![
                FetchRequest::new(Accession::from(2u64), false),
                FetchRequest::new(Accession::from(3u64), false),
            ]
        );
        assert!(ArchiveMarker::read(temp.path()).unwrap().is_none());
        assert_eq!(std::fs::metadata(&archive).unwrap().len(), committed_len + TRAILER);
    }
}

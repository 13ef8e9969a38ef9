//! Download concurrency and request spacing
//!
//! The transport counts requests that are outstanding: from `get` until the
//! response body is dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time::Instant;

use sgmlvault::accession::Accession;
use sgmlvault::fetch::{BodyReader, BufferedBody, FetchClient, FetchResult, Transport, TransportResponse};
use sgmlvault::observability::MetricsRegistry;
use sgmlvault::ratelimit::RateLimiter;

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GaugedBody {
    inner: BufferedBody,
    gauge: Arc<Gauge>,
}

impl Drop for GaugedBody {
    fn drop(&mut self) {
        self.gauge.leave();
    }
}

#[async_trait]
impl BodyReader for GaugedBody {
    async fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> FetchResult<Option<usize>> {
        tokio::time::sleep(Duration::from_micros(200)).await;
        self.inner.read_into(buf, max).await
    }
}

struct GaugedTransport {
    gauge: Arc<Gauge>,
}

#[async_trait]
impl Transport for GaugedTransport {
    async fn get(&self, url: &str) -> FetchResult<TransportResponse> {
        self.gauge.enter();
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(TransportResponse {
            status: 200,
            body: Box::new(GaugedBody {
                inner: BufferedBody::new(url.as_bytes().to_vec(), 8),
                gauge: self.gauge.clone(),
            }),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outstanding_requests_never_exceed_cap() {
    const CAP: usize = 16;
    let gauge = Arc::new(Gauge::default());
    let limiter = RateLimiter::new(1_000_000.0, Duration::from_secs(1)).unwrap();
    let client = Arc::new(FetchClient::new(
        Arc::new(GaugedTransport { gauge: gauge.clone() }),
        Arc::new(limiter),
        CAP,
        "mock://cap/",
        4,
        Arc::new(MetricsRegistry::new()),
    ));

    let mut tasks = JoinSet::new();
    for id in 1..=1000u64 {
        let client = client.clone();
        tasks.spawn(async move { client.fetch(&Accession::from(id), false).await });
    }

    let mut fetched = 0;
    while let Some(result) = tasks.join_next().await {
        let body = result.unwrap().unwrap().body;
        assert!(body.starts_with(b"mock://cap/"));
        fetched += 1;
    }

    assert_eq!(fetched, 1000);
    assert_eq!(gauge.total.load(Ordering::SeqCst), 1000);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= CAP, "peak {} exceeded cap {}", peak, CAP);
    assert!(peak > 1, "requests never overlapped");
}

/// Records when each request reaches the transport
struct Stamping {
    stamps: Mutex<Vec<Instant>>,
}

#[async_trait]
impl Transport for Stamping {
    async fn get(&self, _url: &str) -> FetchResult<TransportResponse> {
        self.stamps.lock().unwrap().push(Instant::now());
        Ok(TransportResponse {
            status: 200,
            body: Box::new(BufferedBody::new(Vec::new(), 1)),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_dispatches_are_spaced_by_interval() {
    let transport = Arc::new(Stamping {
        stamps: Mutex::new(Vec::new()),
    });
    let limiter = RateLimiter::new(4.0, Duration::from_secs(1)).unwrap();
    let interval = limiter.interval();
    let client = Arc::new(FetchClient::new(
        transport.clone(),
        Arc::new(limiter),
        50,
        "mock://rate/",
        1024,
        Arc::new(MetricsRegistry::new()),
    ));

    let mut tasks = JoinSet::new();
    for id in 1..=20u64 {
        let client = client.clone();
        tasks.spawn(async move { client.fetch(&Accession::from(id), false).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let mut stamps = transport.stamps.lock().unwrap().clone();
    stamps.sort();
    assert_eq!(stamps.len(), 20);
    for pair in stamps.windows(2) {
        assert!(pair[1] - pair[0] >= interval);
    }
}

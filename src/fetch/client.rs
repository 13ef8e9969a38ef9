//! Bounded-concurrency submission downloader
//!
//! A download runs inside a slot (a semaphore permit) and waits on the rate
//! limiter before every request. `fetch` holds its slot for the request and
//! the body read. Callers that hand the body on take the slot themselves
//! with [`FetchClient::slot`], keeping it until the body has been handed
//! off. A 429 is retried once after sleeping for the limiter's window.
//! Bodies are read in pieces of at most `chunk_size` bytes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::errors::{FetchError, FetchResult};
use super::transport::Transport;
use crate::accession::Accession;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::ratelimit::RateLimiter;

const TOO_MANY_REQUESTS: u16 = 429;

/// `base + {accession:018}.sgml[.zst]`
pub fn submission_url(base_url: &str, accession: &Accession, compressed: bool) -> String {
    format!(
        "{}{}.sgml{}",
        base_url,
        accession.no_dash(),
        if compressed { ".zst" } else { "" }
    )
}

/// A downloaded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub url: String,
    pub body: Vec<u8>,
    /// True if the first attempt was rate limited
    pub retried: bool,
}

pub struct FetchClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    permits: Arc<Semaphore>,
    base_url: String,
    chunk_size: usize,
    metrics: Arc<MetricsRegistry>,
}

impl FetchClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        max_concurrent: usize,
        base_url: impl Into<String>,
        chunk_size: usize,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            transport,
            limiter,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            base_url: base_url.into(),
            chunk_size: chunk_size.max(1),
            metrics,
        }
    }

    pub fn url_for(&self, accession: &Accession, compressed: bool) -> String {
        submission_url(&self.base_url, accession, compressed)
    }

    /// Wait for one of the `max_concurrent` download slots
    pub async fn slot(&self) -> FetchResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Transport("Download slots closed".to_string()))
    }

    /// Download one submission body inside its own slot
    pub async fn fetch(&self, accession: &Accession, compressed: bool) -> FetchResult<Fetched> {
        let _slot = self.slot().await?;
        self.download(accession, compressed).await
    }

    /// Download one submission body. The caller must already hold a slot
    /// from [`FetchClient::slot`].
    pub async fn download(&self, accession: &Accession, compressed: bool) -> FetchResult<Fetched> {
        let url = self.url_for(accession, compressed);
        let mut retried = false;

        loop {
            self.limiter.acquire().await;
            self.metrics.increment_requests();
            log_event_with_fields(Event::FetchStart, &[("url", url.as_str())]);

            let response = self.transport.get(&url).await?;
            match response.status {
                TOO_MANY_REQUESTS if !retried => {
                    retried = true;
                    self.metrics.increment_rate_limit_retries();
                    log_event_with_fields(
                        Event::FetchRateLimited,
                        &[
                            ("cooldown_ms", &self.limiter.window().as_millis().to_string()),
                            ("url", url.as_str()),
                        ],
                    );
                    drop(response);
                    tokio::time::sleep(self.limiter.window()).await;
                }
                TOO_MANY_REQUESTS => return Err(FetchError::RateLimited { url }),
                status if !(200..300).contains(&status) => {
                    return Err(FetchError::Status { status, url });
                }
                _ => {
                    let mut body = response.body;
                    let mut buf = Vec::with_capacity(self.chunk_size);
                    while body.read_into(&mut buf, self.chunk_size).await?.is_some() {}

                    self.metrics.add_bytes_fetched(buf.len() as u64);
                    log_event_with_fields(
                        Event::FetchComplete,
                        &[("bytes", &buf.len().to_string()), ("url", url.as_str())],
                    );
                    return Ok(Fetched {
                        url,
                        body: buf,
                        retried,
                    });
                }
            }
        }
    }
}

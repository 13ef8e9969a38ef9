//! # Submission Fetching
//!
//! Rate-limited, concurrency-capped downloads of raw containers. One URL per
//! accession: `{base_url}{accession:018}.sgml`, with `.zst` appended for
//! compressed sources.

mod client;
mod errors;
mod transport;

pub use client::{submission_url, FetchClient, Fetched};
pub use errors::{FetchError, FetchResult};
pub use transport::{BodyReader, BufferedBody, HttpTransport, Transport, TransportResponse};

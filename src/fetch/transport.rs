//! HTTP transport seam
//!
//! `FetchClient` talks to the network only through [`Transport`], so tests
//! substitute an in-process implementation for the reqwest one.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

use super::errors::{FetchError, FetchResult};
use crate::config::IngestConfig;

/// Incrementally readable response body
#[async_trait]
pub trait BodyReader: Send {
    /// Append the next piece of the body, at most `max` bytes, to `buf`.
    /// Returns the number of bytes appended, or None once the body is
    /// exhausted.
    async fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> FetchResult<Option<usize>>;
}

pub struct TransportResponse {
    pub status: u16,
    pub body: Box<dyn BodyReader>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> FetchResult<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &IngestConfig) -> FetchResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| FetchError::Transport(format!("Invalid API key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> FetchResult<TransportResponse> {
        let response = self.client.get(url).send().await?;
        Ok(TransportResponse {
            status: response.status().as_u16(),
            body: Box::new(HttpBody {
                response,
                pending: Vec::new(),
                pos: 0,
            }),
        })
    }
}

/// Network chunks arrive in whatever sizes the connection yields; the
/// unread tail of the last one is kept in `pending`.
struct HttpBody {
    response: reqwest::Response,
    pending: Vec<u8>,
    pos: usize,
}

#[async_trait]
impl BodyReader for HttpBody {
    async fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> FetchResult<Option<usize>> {
        if self.pos >= self.pending.len() {
            let Some(chunk) = self.response.chunk().await? else {
                return Ok(None);
            };
            self.pending.clear();
            self.pending.extend_from_slice(&chunk);
            self.pos = 0;
        }
        Ok(Some(take_piece(&self.pending, &mut self.pos, max, buf)))
    }
}

/// Copy up to `max` bytes of `data` from `pos` into `buf`
fn take_piece(data: &[u8], pos: &mut usize, max: usize, buf: &mut Vec<u8>) -> usize {
    let end = (*pos + max.max(1)).min(data.len());
    buf.extend_from_slice(&data[*pos..end]);
    let n = end - *pos;
    *pos = end;
    n
}

/// In-memory body, served in fixed pieces
pub struct BufferedBody {
    data: Vec<u8>,
    pos: usize,
    piece: usize,
}

impl BufferedBody {
    pub fn new(data: Vec<u8>, piece: usize) -> Self {
        Self {
            data,
            pos: 0,
            piece: piece.max(1),
        }
    }
}

#[async_trait]
impl BodyReader for BufferedBody {
    async fn read_into(&mut self, buf: &mut Vec<u8>, max: usize) -> FetchResult<Option<usize>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        let max = max.min(self.piece);
        Ok(Some(take_piece(&self.data, &mut self.pos, max, buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_body_pieces() {
        let mut body = BufferedBody::new(b"abcdefg".to_vec(), 3);
        let mut buf = Vec::new();
        assert_eq!(body.read_into(&mut buf, 64).await.unwrap(), Some(3));
        assert_eq!(body.read_into(&mut buf, 64).await.unwrap(), Some(3));
        assert_eq!(body.read_into(&mut buf, 64).await.unwrap(), Some(1));
        assert_eq!(body.read_into(&mut buf, 64).await.unwrap(), None);
        assert_eq!(buf, b"abcdefg");
    }

    #[tokio::test]
    async fn test_read_respects_max() {
        let mut body = BufferedBody::new(b"abcdefg".to_vec(), 100);
        let mut buf = Vec::new();
        assert_eq!(body.read_into(&mut buf, 2).await.unwrap(), Some(2));
        assert_eq!(body.read_into(&mut buf, 0).await.unwrap(), Some(1));
        assert_eq!(body.read_into(&mut buf, 10).await.unwrap(), Some(4));
        assert_eq!(body.read_into(&mut buf, 10).await.unwrap(), None);
        assert_eq!(buf, b"abcdefg");
    }

    #[test]
    fn test_take_piece_stops_at_end() {
        let mut pos = 5;
        let mut buf = Vec::new();
        assert_eq!(take_piece(b"abcdefg", &mut pos, 4, &mut buf), 2);
        assert_eq!(pos, 7);
        assert_eq!(buf, b"fg");
    }

    #[test]
    fn test_http_transport_builds() {
        let mut config = IngestConfig::default();
        config.api_key = Some("secret".into());
        assert!(HttpTransport::new(&config).is_ok());

        config.api_key = Some("bad\nkey".into());
        assert!(matches!(HttpTransport::new(&config), Err(FetchError::Transport(_))));
    }
}

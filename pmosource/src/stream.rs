//! Stream opener: turns a resolved [`Track`] into readable media bytes
//!
//! The opener asks the owning provider for a fresh [`StreamDescriptor`],
//! connects to it and hands back a [`StreamHandle`]. Transient failures are
//! retried with exponential backoff, an expired media URL (403/410 on
//! connect) is re-derived once, and permanent failures are returned as is.

use crate::error::{Result, SourceError};
use crate::http::check_status;
use crate::model::Track;
use crate::provider::{MediaContainer, SourceProvider, StreamDescriptor, bounded};
use bytes::{Buf, Bytes};
use futures::stream::{Stream, StreamExt};
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry (250 ms)
pub const DEFAULT_BACKOFF_MS: u64 = 250;

/// Default upper bound for a single backoff delay (4 s)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 4000;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`1 + max_retries` attempts in total)
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each following one
    pub backoff: Duration,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            max_backoff,
        }
    }

    /// Delay to wait before retry number `retry` (0-based)
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Total attempts allowed for one operation
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Opens media streams for resolved tracks
#[derive(Debug, Clone)]
pub struct StreamOpener {
    client: Client,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl StreamOpener {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            call_timeout: None,
        }
    }

    /// Bound every `get_stream` call made by the opener
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open a byte stream for `track`, using `provider` to locate the media
    ///
    /// `provider` must be the provider named by `track.source_name`; the
    /// registry takes care of that pairing.
    pub async fn open(&self, provider: &dyn SourceProvider, track: &Track) -> Result<StreamHandle> {
        let mut descriptor = self.locate(provider, track).await?;
        let mut rederived = false;

        loop {
            let reason = if descriptor.is_expired() {
                "media URL expired".to_string()
            } else {
                let response = self
                    .with_retry("connect", || connect(&self.client, &descriptor, 0))
                    .await?;
                let status = response.status();

                if !is_expiry_status(status) {
                    info!(
                        provider = %provider.name(),
                        track = %track.identifier,
                        "Stream opened"
                    );
                    return Ok(StreamHandle::new(self.client.clone(), descriptor, response));
                }
                format!("media URL expired (HTTP {})", status.as_u16())
            };

            if rederived {
                return Err(SourceError::StreamUnavailable {
                    attempts: 2,
                    reason: format!("{} again after re-deriving it", reason),
                });
            }

            warn!(
                provider = %provider.name(),
                track = %track.identifier,
                "{}, asking the provider for a fresh location", reason
            );
            rederived = true;
            descriptor = self.locate(provider, track).await?;
        }
    }

    async fn locate(&self, provider: &dyn SourceProvider, track: &Track) -> Result<StreamDescriptor> {
        self.with_retry("locate stream", || {
            bounded(self.call_timeout, "get_stream", provider.get_stream(track))
        })
        .await
    }

    /// Run `op` up to `1 + max_retries` times while it fails transiently
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= attempts {
                        warn!(attempts, "{} failed, giving up: {}", what, err);
                        return Err(SourceError::StreamUnavailable {
                            attempts,
                            reason: err.to_string(),
                        });
                    }
                    let delay = self.policy.delay(attempt - 1);
                    debug!(attempt, ?delay, "{} failed transiently: {}", what, err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_expiry_status(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN || status == StatusCode::GONE
}

/// Send the GET request for `descriptor`, starting at byte `offset`
///
/// Successful responses and expiry answers (403/410) come back as `Ok`;
/// any other status is mapped to an error.
async fn connect(client: &Client, descriptor: &StreamDescriptor, offset: u64) -> Result<Response> {
    let mut request = client.get(&descriptor.url);
    for (name, value) in &descriptor.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if offset > 0 {
        request = request.header(RANGE, format!("bytes={}-", offset));
    }

    debug!(url = %descriptor.url, offset, "Connecting to media URL");
    let response = request.send().await?;
    if is_expiry_status(response.status()) {
        return Ok(response);
    }
    check_status(response).await
}

/// Total length from a `Content-Range: bytes a-b/total` header
fn total_from_content_range(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// An open connection to a track's media bytes
///
/// Owned by a single consumer. Dropping the handle (or calling
/// [`close`](Self::close)) releases the connection.
pub struct StreamHandle {
    client: Client,
    descriptor: StreamDescriptor,
    body: Option<BodyStream>,
    pending: Bytes,
    /// Absolute offset right after the last byte received from the network
    received: u64,
    /// Bytes to discard because the server ignored our Range header
    skip: u64,
    content_length: Option<u64>,
    content_type: Option<String>,
    seekable: bool,
    reconnected: bool,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("url", &self.descriptor.url)
            .field("position", &self.position())
            .field("content_length", &self.content_length)
            .field("seekable", &self.seekable)
            .field("open", &self.body.is_some())
            .finish()
    }
}

impl StreamHandle {
    fn new(client: Client, descriptor: StreamDescriptor, response: Response) -> Self {
        let content_length = total_from_content_range(&response)
            .or_else(|| response.content_length())
            .or(descriptor.content_length);
        let accepts_ranges = response
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            client,
            descriptor,
            body: Some(Box::pin(response.bytes_stream())),
            pending: Bytes::new(),
            received: 0,
            skip: 0,
            seekable: accepts_ranges && content_length.is_some(),
            content_length,
            content_type,
            reconnected: false,
        }
    }

    /// Current read position in bytes
    pub fn position(&self) -> u64 {
        self.received - self.pending.len() as u64
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// True when the server advertised byte ranges and a known length
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Content-Type sent by the media server
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn container(&self) -> MediaContainer {
        self.descriptor.container
    }

    /// Media URL this handle reads from
    pub fn url(&self) -> &str {
        &self.descriptor.url
    }

    /// Read the next chunk of bytes; `None` at end of stream
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }

        loop {
            let Some(body) = self.body.as_mut() else {
                return Ok(None);
            };

            match body.next().await {
                Some(Ok(mut chunk)) => {
                    self.reconnected = false;
                    if self.skip > 0 {
                        let n = (self.skip as usize).min(chunk.len());
                        chunk.advance(n);
                        self.skip -= n as u64;
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    self.received += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Some(Err(err)) => {
                    let err = SourceError::from(err);
                    if err.is_transient() && !self.reconnected {
                        warn!(position = self.received, "Stream interrupted, reconnecting: {}", err);
                        self.reconnected = true;
                        self.reconnect(self.received).await?;
                        continue;
                    }
                    return Err(err);
                }
                None => {
                    let truncated = self.content_length.is_some_and(|len| self.received < len);
                    if truncated && !self.reconnected {
                        warn!(position = self.received, "Stream ended early, reconnecting");
                        self.reconnected = true;
                        self.reconnect(self.received).await?;
                        continue;
                    }
                    self.body = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Read up to `buf.len()` bytes; returns 0 at end of stream
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self.next_chunk().await? {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    /// Read everything left in the stream
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Move the read position to `position` (absolute byte offset)
    pub async fn seek(&mut self, position: u64) -> Result<u64> {
        if !self.seekable {
            return Err(SourceError::permanent(format!(
                "{} is not seekable",
                self.descriptor.url
            )));
        }
        if let Some(len) = self.content_length {
            if position > len {
                return Err(SourceError::permanent(format!(
                    "seek to {} past the end of a {} bytes stream",
                    position, len
                )));
            }
        }
        if position == self.position() {
            return Ok(position);
        }
        // nothing left to request, a Range starting at the length gets a 416
        if self.content_length == Some(position) {
            self.close();
            self.received = position;
            self.skip = 0;
            self.reconnected = false;
            return Ok(position);
        }

        self.reconnect(position).await?;
        self.reconnected = false;
        Ok(position)
    }

    /// Release the connection; further reads return end of stream
    pub fn close(&mut self) {
        self.body = None;
        self.pending = Bytes::new();
    }

    async fn reconnect(&mut self, offset: u64) -> Result<()> {
        self.body = None;
        self.pending = Bytes::new();

        let response = connect(&self.client, &self.descriptor, offset).await?;
        if is_expiry_status(response.status()) {
            return Err(SourceError::StreamUnavailable {
                attempts: 1,
                reason: format!(
                    "media URL expired while reading (HTTP {})",
                    response.status().as_u16()
                ),
            });
        }
        self.skip = if offset > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };
        self.received = offset;
        self.body = Some(Box::pin(response.bytes_stream()));
        Ok(())
    }
}

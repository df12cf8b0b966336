//! Filtered-stream consumption: NDJSON lines in, bus publishes out.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use trendwire_bus::{BusError, Publisher};

use crate::error::ProviderError;
use crate::provider::{ByteStream, ProviderApi, StreamResponse};

const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Longest unterminated line buffered before the connection is dropped.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// An open stream whose body has not been consumed yet.
pub struct StreamHandle {
    body: ByteStream,
}

impl StreamHandle {
    pub fn new(body: ByteStream) -> Self {
        Self { body }
    }
}

/// Counters for one consumed connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Non-empty lines decoded.
    pub lines: u64,
    pub published: u64,
    /// Empty keep-alive lines.
    pub keep_alives: u64,
    /// Lines carrying an `errors` envelope.
    pub soft_errors: u64,
    /// Records dropped because the publish buffer was full.
    pub dropped: u64,
}

impl fmt::Display for StreamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lines={} published={} keep_alives={} soft_errors={} dropped={}",
            self.lines, self.published, self.keep_alives, self.soft_errors, self.dropped
        )
    }
}

/// Reads the provider's filtered stream and republishes each record.
pub struct StreamListener {
    provider: Arc<dyn ProviderApi>,
    publisher: Arc<dyn Publisher>,
    max_line_bytes: usize,
}

impl StreamListener {
    pub fn new(provider: Arc<dyn ProviderApi>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            provider,
            publisher,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        self.max_line_bytes = limit.max(1);
        self
    }

    /// Open the stream. `Ok(None)` means the provider is rate limiting new
    /// connections; try again later.
    pub async fn open_stream(&self) -> Result<Option<StreamHandle>, ProviderError> {
        match self.provider.open_stream().await? {
            StreamResponse::Open(body) => {
                info!("stream connection opened");
                Ok(Some(StreamHandle::new(body)))
            }
            StreamResponse::Rejected { status, body } if status == STATUS_TOO_MANY_REQUESTS => {
                info!(body = %body, "connection limit reached, not starting a new stream");
                Ok(None)
            }
            StreamResponse::Rejected { status, body } => Err(ProviderError::Status {
                operation: "get stream",
                status,
                body,
            }),
        }
    }

    /// Consume the body until it ends. Read and decode failures end the
    /// connection with an error, as does an unterminated line longer than
    /// the line limit.
    pub async fn consume(&self, handle: StreamHandle) -> Result<StreamSummary, ProviderError> {
        let mut body = handle.body;
        let mut buffer: Vec<u8> = Vec::new();
        // Prefix of `buffer` already searched for a newline.
        let mut scanned = 0;
        let mut summary = StreamSummary::default();

        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);

            let mut start = 0;
            while let Some(offset) = buffer[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + offset;
                self.handle_line(&buffer[start..=end], &mut summary)?;
                start = end + 1;
                scanned = start;
            }
            buffer.drain(..start);
            scanned = buffer.len();

            if buffer.len() > self.max_line_bytes {
                warn!(buffered = buffer.len(), "unterminated stream line over the limit");
                return Err(ProviderError::LineTooLong {
                    limit: self.max_line_bytes,
                });
            }
        }

        // Final line without a trailing newline.
        if !buffer.is_empty() {
            self.handle_line(&buffer, &mut summary)?;
        }

        info!(%summary, "stream ended");
        Ok(summary)
    }

    /// Open and consume one connection. `Ok(None)` when rate limited.
    pub async fn listen(&self) -> Result<Option<StreamSummary>, ProviderError> {
        match self.open_stream().await? {
            Some(handle) => self.consume(handle).await.map(Some),
            None => Ok(None),
        }
    }

    fn handle_line(&self, raw: &[u8], summary: &mut StreamSummary) -> Result<(), ProviderError> {
        let line = trim_line(raw);
        if line.is_empty() {
            summary.keep_alives += 1;
            return Ok(());
        }

        summary.lines += 1;
        let record: Value = serde_json::from_slice(line)?;
        debug!(record = %record, "received stream record");

        // The provider can answer 200 and still report operational errors
        // in-band.
        if let Some(errors) = record.get("errors") {
            summary.soft_errors += 1;
            info!(errors = %errors, "errors received from provider, not publishing");
            return Ok(());
        }

        match self.publisher.publish(serde_json::to_vec(&record)?) {
            Ok(()) => {
                summary.published += 1;
                Ok(())
            }
            Err(BusError::BufferFull) => {
                summary.dropped += 1;
                warn!("publish buffer full, record dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = &raw[..end];
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        &[]
    } else {
        line
    }
}

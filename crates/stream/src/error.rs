use thiserror::Error;

use trendwire_bus::BusError;

/// Failures talking to the stream provider.
///
/// Every variant is fatal to the current connection attempt only; the
/// supervisor logs it and reconnects on the next cycle.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("cannot {operation} (HTTP {status}): {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream line exceeds {limit} bytes without a newline")]
    LineTooLong { limit: usize },

    #[error("invalid JSON from provider: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("publish handoff failed: {0}")]
    Publish(#[from] BusError),
}

//! Message bus error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bus API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("publish buffer full, record dropped")]
    BufferFull,

    #[error("publisher closed")]
    Closed,
}

use thiserror::Error;

/// A bus payload that cannot become a [`trendwire_core::NormalizedRecord`].
///
/// Never retried: redelivering the same bytes cannot fix it.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The service refused the input itself (unsupported language, empty
    /// text). The record is stored without sentiment.
    #[error("input not supported by sentiment service: {0}")]
    Unsupported(String),

    #[error("sentiment service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    #[error("sentiment request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid sentiment response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination table does not exist yet.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Worth retrying: network failures, throttling, server errors.
    #[error("transient warehouse error: {0}")]
    Transient(String),

    /// Retrying cannot help: bad request, schema mismatch.
    #[error("permanent warehouse error: {0}")]
    Permanent(String),

    /// The rows at these batch positions are invalid; the rest of the batch
    /// was not written but can be resent without them.
    #[error("{} invalid rows: {message}", rows.len())]
    InvalidRows { rows: Vec<usize>, message: String },

    #[error("warehouse append failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }

    /// Resending the same rows can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, SinkError::Permanent(_) | SinkError::InvalidRows { .. })
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no {0} stage")]
    MissingStage(&'static str),
}

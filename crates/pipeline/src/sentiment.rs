//! Sentiment enrichment through the Cloud Natural Language REST API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use trendwire_core::{EnrichedRecord, NormalizedRecord, Sentiment};

use crate::error::AnalysisError;

/// Scores a piece of text.
#[async_trait]
pub trait SentimentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<Sentiment, AnalysisError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentResponse {
    #[serde(default)]
    document_sentiment: DocumentSentiment,
    #[serde(default)]
    language: String,
}

// Zero-valued fields are omitted from the JSON response.
#[derive(Debug, Default, Deserialize)]
struct DocumentSentiment {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    magnitude: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

/// `documents:analyzeSentiment` client.
#[derive(Clone)]
pub struct LanguageClient {
    http: reqwest::Client,
    url: String,
    access_token: String,
}

impl LanguageClient {
    pub fn new(endpoint: &str, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!(
                "{}/v1/documents:analyzeSentiment",
                endpoint.trim_end_matches('/')
            ),
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl SentimentAnalyzer for LanguageClient {
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn analyze(&self, text: &str) -> Result<Sentiment, AnalysisError> {
        let body = json!({
            "document": { "type": "PLAIN_TEXT", "content": text },
            "encodingType": "UTF8",
        });
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if status == 200 {
            let parsed: AnalyzeSentimentResponse = serde_json::from_str(&body)?;
            debug!(
                score = parsed.document_sentiment.score,
                magnitude = parsed.document_sentiment.magnitude,
                language = %parsed.language,
                "sentiment analyzed"
            );
            return Ok(Sentiment {
                score: parsed.document_sentiment.score,
                magnitude: parsed.document_sentiment.magnitude,
                language: parsed.language,
            });
        }

        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) if status == 400 && envelope.error.status == "INVALID_ARGUMENT" => {
                Err(AnalysisError::Unsupported(envelope.error.message))
            }
            _ => Err(AnalysisError::Service { status, body }),
        }
    }
}

/// Attaches sentiment to records, passing unsupported input through.
#[derive(Clone)]
pub struct SentimentEnricher {
    analyzer: Arc<dyn SentimentAnalyzer>,
}

impl SentimentEnricher {
    pub fn new(analyzer: Arc<dyn SentimentAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Analyze `record.text`. An unsupported-input answer yields the record
    /// unenriched; every other failure is returned to the caller.
    pub async fn enrich(&self, record: NormalizedRecord) -> Result<EnrichedRecord, AnalysisError> {
        match self.analyzer.analyze(&record.text).await {
            Ok(sentiment) => Ok(EnrichedRecord::with_sentiment(record, sentiment)),
            Err(AnalysisError::Unsupported(reason)) => {
                info!(
                    id = %record.id,
                    reason = %reason,
                    "sentiment not available, storing record without it"
                );
                Ok(EnrichedRecord::unenriched(record))
            }
            Err(e) => Err(e),
        }
    }
}

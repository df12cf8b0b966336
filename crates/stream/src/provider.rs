//! Transport seam for the filtered-stream provider.
//!
//! [`ProviderApi`] only moves bytes and status codes; deciding what a status
//! means (rate limit, hard failure, created) is left to [`crate::RuleManager`]
//! and [`crate::StreamListener`], so fakes stay trivial.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, instrument};

use trendwire_core::config::ProviderConfig;

use crate::error::ProviderError;

/// Incrementally delivered response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// A fully buffered response from the rules endpoint.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: String,
}

impl ProviderResponse {
    pub fn json(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Outcome of opening the stream endpoint.
pub enum StreamResponse {
    /// 200: the body is delivered chunk by chunk.
    Open(ByteStream),
    /// Any other status, with the (small) error body read eagerly.
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// `GET` the active rule set.
    async fn get_rules(&self) -> Result<ProviderResponse, ProviderError>;

    /// `POST` an add or delete request to the rules endpoint.
    async fn post_rules(&self, payload: &Value) -> Result<ProviderResponse, ProviderError>;

    /// Open the long-lived filtered stream.
    async fn open_stream(&self) -> Result<StreamResponse, ProviderError>;
}

/// reqwest-backed provider client with bearer auth and a fixed user agent.
pub struct HttpProvider {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    rules_url: String,
    stream_url: String,
    bearer_token: String,
}

impl HttpProvider {
    pub fn new(
        config: &ProviderConfig,
        bearer_token: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let base = config.base_url.trim_end_matches('/');
        let read_timeout = Duration::from_secs(config.read_timeout_secs);

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;

        // No total timeout on the stream: it is meant to stay open. The read
        // timeout bounds silence between chunks instead.
        let stream_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(read_timeout)
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            client,
            stream_client,
            rules_url: format!("{base}/tweets/search/stream/rules"),
            stream_url: format!("{base}/tweets/search/stream?tweet.fields=created_at"),
            bearer_token: bearer_token.into(),
        })
    }

    async fn buffered(response: reqwest::Response) -> Result<ProviderResponse, ProviderError> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ProviderResponse { status, body })
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    #[instrument(skip_all)]
    async fn get_rules(&self) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .get(&self.rules_url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;
        Self::buffered(response).await
    }

    #[instrument(skip_all)]
    async fn post_rules(&self, payload: &Value) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .client
            .post(&self.rules_url)
            .bearer_auth(&self.bearer_token)
            .json(payload)
            .send()
            .await?;
        Self::buffered(response).await
    }

    #[instrument(skip_all)]
    async fn open_stream(&self) -> Result<StreamResponse, ProviderError> {
        let response = self
            .stream_client
            .get(&self.stream_url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let status = response.status().as_u16();
        debug!(status, "stream endpoint responded");
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Ok(StreamResponse::Rejected { status, body });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ProviderError::from));
        Ok(StreamResponse::Open(Box::pin(body)))
    }
}

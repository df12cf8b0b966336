//! Google Cloud Pub/Sub over its REST API.
//!
//! [`PubSubClient`] speaks the wire format; [`PubSubPublisher`] adds a
//! background batching task so callers never wait on the network, and
//! [`PubSubSubscriber`] exposes pull/ack/nack for the enrichment pipeline.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use trendwire_core::config::topic_path;

use crate::batcher::MicroBatcher;
use crate::error::BusError;
use crate::message::{BusMessage, Publisher, Subscriber};

// ── REST client ─────────────────────────────────────────────────────

/// Thin REST client for the Pub/Sub v1 API.
#[derive(Clone)]
pub struct PubSubClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
}

#[derive(Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
}

impl PubSubClient {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    async fn post(
        &self,
        resource: &str,
        verb: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, BusError> {
        let url = format!("{}/v1/{}:{}", self.endpoint, resource, verb);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BusError::Api { status, body });
        }
        Ok(response)
    }

    /// Publish a batch of payloads; returns the assigned message ids.
    pub async fn publish(
        &self,
        topic: &str,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<String>, BusError> {
        let messages: Vec<OutgoingMessage> = payloads
            .iter()
            .map(|p| OutgoingMessage {
                data: general_purpose::STANDARD.encode(p),
            })
            .collect();

        let response = self.post(topic, "publish", json!({ "messages": messages })).await?;
        let parsed: PublishResponse = response.json().await?;
        Ok(parsed.message_ids)
    }

    /// Pull up to `max_messages` from a subscription.
    ///
    /// A message whose data is not valid base64 comes back with an empty
    /// payload, so the consumer rejects it on its own without failing the
    /// rest of the pull.
    pub async fn pull(
        &self,
        subscription: &str,
        max_messages: u32,
    ) -> Result<Vec<BusMessage>, BusError> {
        let response = self
            .post(subscription, "pull", json!({ "maxMessages": max_messages }))
            .await?;
        let parsed: PullResponse = response.json().await?;

        Ok(parsed
            .received_messages
            .into_iter()
            .map(|received| {
                let message = received.message;
                let payload = match general_purpose::STANDARD.decode(message.data.as_bytes()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(message_id = %message.message_id, error = %e, "invalid base64 data");
                        Vec::new()
                    }
                };
                BusMessage {
                    ack_id: received.ack_id,
                    message_id: message.message_id,
                    payload,
                    publish_time: message.publish_time.unwrap_or_else(Utc::now),
                    delivery_attempt: received.delivery_attempt.unwrap_or(1),
                }
            })
            .collect())
    }

    pub async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), BusError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(subscription, "acknowledge", json!({ "ackIds": ack_ids }))
            .await?;
        Ok(())
    }

    /// Zero deadline makes the deliveries immediately available again.
    pub async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: &[String],
        deadline_secs: u32,
    ) -> Result<(), BusError> {
        if ack_ids.is_empty() {
            return Ok(());
        }
        self.post(
            subscription,
            "modifyAckDeadline",
            json!({ "ackIds": ack_ids, "ackDeadlineSeconds": deadline_secs }),
        )
        .await?;
        Ok(())
    }
}

// ── Publisher ───────────────────────────────────────────────────────

/// Batching settings for [`PubSubPublisher`].
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub batch_size: usize,
    pub batch_wait: Duration,
    pub buffer: usize,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_wait: Duration::from_millis(50),
            buffer: 10_000,
        }
    }
}

/// Non-blocking Pub/Sub publisher.
///
/// `publish` enqueues onto a bounded channel; a background task groups
/// payloads into micro-batches and posts them. Delivery failures are logged
/// by that task and not retried.
pub struct PubSubPublisher {
    tx: mpsc::Sender<Vec<u8>>,
    topic: Arc<RwLock<String>>,
}

impl PubSubPublisher {
    /// Start the background publish task for `topic` (fully qualified).
    ///
    /// The task exits after every publisher handle is dropped and the last
    /// batch has been sent.
    pub fn spawn(
        client: PubSubClient,
        topic: impl Into<String>,
        settings: PublishSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.buffer.max(1));
        let topic = Arc::new(RwLock::new(topic.into()));
        info!(
            topic = %read_topic(&topic),
            batch_size = settings.batch_size,
            "Pub/Sub publisher started"
        );

        let handle = tokio::spawn(publish_loop(client, rx, topic.clone(), settings));
        (Self { tx, topic }, handle)
    }

    /// Re-target subsequent batches to another topic.
    pub fn set_topic(&self, project_id: &str, topic: &str) {
        let path = topic_path(project_id, topic);
        info!(topic = %path, "publisher topic changed");
        *self.topic.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    pub fn topic(&self) -> String {
        read_topic(&self.topic)
    }
}

impl Publisher for PubSubPublisher {
    fn publish(&self, payload: Vec<u8>) -> Result<(), BusError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BusError::BufferFull),
            Err(TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }
}

fn read_topic(topic: &RwLock<String>) -> String {
    topic.read().unwrap_or_else(|e| e.into_inner()).clone()
}

async fn publish_loop(
    client: PubSubClient,
    mut rx: mpsc::Receiver<Vec<u8>>,
    topic: Arc<RwLock<String>>,
    settings: PublishSettings,
) {
    let mut batcher = MicroBatcher::new(settings.batch_size, settings.batch_wait);

    loop {
        let deadline = batcher.remaining_wait().unwrap_or(settings.batch_wait);
        tokio::select! {
            received = rx.recv() => match received {
                Some(payload) => {
                    batcher.push([payload]);
                    if let Some(batch) = batcher.try_flush() {
                        send_batch(&client, &read_topic(&topic), batch).await;
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep(deadline) => {
                if let Some(batch) = batcher.try_flush() {
                    send_batch(&client, &read_topic(&topic), batch).await;
                }
            }
        }
    }

    if !batcher.is_empty() {
        send_batch(&client, &read_topic(&topic), batcher.flush()).await;
    }
    debug!("Pub/Sub publish task exited");
}

async fn send_batch(client: &PubSubClient, topic: &str, batch: Vec<Vec<u8>>) {
    let count = batch.len();
    match client.publish(topic, &batch).await {
        Ok(ids) => debug!(topic, count, assigned = ids.len(), "published batch"),
        Err(e) => warn!(topic, count, error = %e, "Pub/Sub publish failed, batch dropped"),
    }
}

// ── Subscriber ──────────────────────────────────────────────────────

/// Pull subscriber bound to one fully-qualified subscription.
pub struct PubSubSubscriber {
    client: PubSubClient,
    subscription: String,
}

impl PubSubSubscriber {
    pub fn new(client: PubSubClient, subscription: impl Into<String>) -> Self {
        let subscription = subscription.into();
        info!(subscription = %subscription, "Pub/Sub subscriber initialized");
        Self {
            client,
            subscription,
        }
    }
}

#[async_trait]
impl Subscriber for PubSubSubscriber {
    async fn pull(&self, max_messages: u32) -> Result<Vec<BusMessage>, BusError> {
        let messages = self.client.pull(&self.subscription, max_messages).await?;
        debug!(count = messages.len(), "pulled Pub/Sub messages");
        Ok(messages)
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        self.client.acknowledge(&self.subscription, ack_ids).await
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        debug!(count = ack_ids.len(), "nacking deliveries (deadline=0)");
        self.client
            .modify_ack_deadline(&self.subscription, ack_ids, 0)
            .await
    }
}

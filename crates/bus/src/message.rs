//! Bus message type and the publisher/subscriber seams.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// A message pulled from a bus subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Handle used to acknowledge or redeliver this delivery.
    pub ack_id: String,
    /// Bus-assigned message identifier (stable across redeliveries).
    pub message_id: String,
    /// Opaque payload bytes exactly as published.
    pub payload: Vec<u8>,
    /// When the message was accepted by the bus.
    pub publish_time: DateTime<Utc>,
    /// Number of times this message has been delivered (1 on first delivery).
    pub delivery_attempt: u32,
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BusMessage {{ id: {}, bytes: {}, attempt: {} }}",
            self.message_id,
            self.payload.len(),
            self.delivery_attempt
        )
    }
}

/// Fire-and-forget publishing to a fixed topic.
///
/// `publish` never waits for the bus: it hands the payload to the client's
/// own delivery machinery and returns. Errors only report that the handoff
/// itself failed.
pub trait Publisher: Send + Sync {
    fn publish(&self, payload: Vec<u8>) -> Result<(), BusError>;
}

impl<T: Publisher + ?Sized> Publisher for Arc<T> {
    fn publish(&self, payload: Vec<u8>) -> Result<(), BusError> {
        (**self).publish(payload)
    }
}

/// Pull-based consumption with explicit acknowledgement.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Pull up to `max_messages`. Returns an empty vec when nothing is waiting.
    async fn pull(&self, max_messages: u32) -> Result<Vec<BusMessage>, BusError>;

    /// Acknowledge processed deliveries so they are not redelivered.
    async fn ack(&self, ack_ids: &[String]) -> Result<(), BusError>;

    /// Return deliveries to the bus for immediate redelivery.
    async fn nack(&self, ack_ids: &[String]) -> Result<(), BusError>;
}

#[async_trait]
impl<T: Subscriber + ?Sized> Subscriber for Arc<T> {
    async fn pull(&self, max_messages: u32) -> Result<Vec<BusMessage>, BusError> {
        (**self).pull(max_messages).await
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        (**self).ack(ack_ids).await
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        (**self).nack(ack_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_payload_bytes() {
        let msg = BusMessage {
            ack_id: "ack-1".into(),
            message_id: "m-1".into(),
            payload: br#"{"data":{}}"#.to_vec(),
            publish_time: Utc::now(),
            delivery_attempt: 2,
        };
        let display = msg.to_string();
        assert!(display.contains("m-1"));
        assert!(display.contains("bytes: 11"));
        assert!(!display.contains("data"));
    }
}

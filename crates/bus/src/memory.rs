//! In-process bus with Pub/Sub-like delivery semantics.
//!
//! Published payloads become pullable messages; pulled messages stay in
//! flight until acked, and nacked ones are redelivered with an incremented
//! attempt count. Used for local runs and throughout the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::BusError;
use crate::message::{BusMessage, Publisher, Subscriber};

#[derive(Default)]
struct State {
    next_id: u64,
    ready: VecDeque<BusMessage>,
    in_flight: HashMap<String, BusMessage>,
    published: Vec<Vec<u8>>,
    acked: Vec<String>,
    nacked: u64,
}

/// Cloneable handle to a shared in-memory topic + subscription.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<State>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every payload ever published, in publish order.
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.lock().published.clone()
    }

    /// Message ids acknowledged so far.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Number of deliveries returned with `nack`.
    pub fn nacked(&self) -> u64 {
        self.lock().nacked
    }

    /// Messages waiting to be pulled.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Messages pulled but neither acked nor nacked.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }
}

impl Publisher for InMemoryBus {
    fn publish(&self, payload: Vec<u8>) -> Result<(), BusError> {
        let mut state = self.lock();
        state.next_id += 1;
        let message_id = state.next_id.to_string();
        state.published.push(payload.clone());
        state.ready.push_back(BusMessage {
            ack_id: String::new(),
            message_id,
            payload,
            publish_time: Utc::now(),
            delivery_attempt: 0,
        });
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryBus {
    async fn pull(&self, max_messages: u32) -> Result<Vec<BusMessage>, BusError> {
        let mut state = self.lock();
        let take = (max_messages as usize).min(state.ready.len());
        let mut out = Vec::with_capacity(take);

        for _ in 0..take {
            let Some(mut msg) = state.ready.pop_front() else { break };
            msg.delivery_attempt += 1;
            msg.ack_id = format!("{}-{}", msg.message_id, msg.delivery_attempt);
            state.in_flight.insert(msg.ack_id.clone(), msg.clone());
            out.push(msg);
        }
        Ok(out)
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        let mut state = self.lock();
        for ack_id in ack_ids {
            if let Some(msg) = state.in_flight.remove(ack_id) {
                state.acked.push(msg.message_id);
            }
        }
        Ok(())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), BusError> {
        let mut state = self.lock();
        for ack_id in ack_ids {
            if let Some(msg) = state.in_flight.remove(ack_id) {
                state.nacked += 1;
                state.ready.push_back(msg);
            }
        }
        Ok(())
    }
}

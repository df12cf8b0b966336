//! Connection supervisor for the stream listener.
//!
//! A small state machine driven by [`ConnectionSupervisor::cycle`]. Each cycle
//! first checks whether the background stream worker is still alive, then
//! (re)connects when there is none: re-sync the rules, open the stream, and
//! spawn a task that consumes it. [`ConnectionSupervisor::run`] repeats cycles
//! every liveness interval until the cancellation token fires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trendwire_core::Rule;

use crate::error::ProviderError;
use crate::listener::{StreamListener, StreamSummary};
use crate::rules::RuleManager;

type WorkerResult = Result<StreamSummary, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    /// Last connect attempt failed; waiting out the interval.
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Backoff => write!(f, "backoff"),
        }
    }
}

pub struct ConnectionSupervisor {
    rules: RuleManager,
    listener: Arc<StreamListener>,
    desired_rules: Vec<Rule>,
    interval: Duration,
    state: ConnectionState,
    worker: Option<JoinHandle<WorkerResult>>,
    attempts: u64,
}

impl ConnectionSupervisor {
    pub fn new(
        rules: RuleManager,
        listener: Arc<StreamListener>,
        desired_rules: Vec<Rule>,
        interval: Duration,
    ) -> Self {
        Self {
            rules,
            listener,
            desired_rules,
            interval,
            state: ConnectionState::Disconnected,
            worker: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// One supervision step: liveness check, then reconnect if idle.
    pub async fn cycle(&mut self) {
        self.check_liveness().await;

        if self.worker.is_none() {
            if self.state == ConnectionState::Backoff {
                self.transition(ConnectionState::Disconnected);
            }
            self.connect().await;
        }
    }

    /// Run cycles every interval until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval = ?self.interval,
            rules = self.desired_rules.len(),
            "supervisor started"
        );

        while !cancel.is_cancelled() {
            self.cycle().await;

            info!(
                interval = ?self.interval,
                state = %self.state,
                "waiting before next liveness check"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.shutdown();
        info!(attempts = self.attempts, "supervisor stopped");
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
            info!("stream worker aborted");
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn check_liveness(&mut self) {
        let finished = match &self.worker {
            Some(worker) => worker.is_finished(),
            None => return,
        };

        if !finished {
            info!("stream worker still alive");
            return;
        }

        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(Ok(summary)) => info!(%summary, "stream worker finished"),
                Ok(Err(e)) => warn!(error = %e, "stream worker failed"),
                Err(e) => error!(error = %e, "stream worker panicked"),
            }
        }
        self.transition(ConnectionState::Disconnected);
    }

    async fn connect(&mut self) {
        self.attempts += 1;
        self.transition(ConnectionState::Connecting);

        let installed = match self.rules.sync_rules(&self.desired_rules).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "rule sync failed");
                self.transition(ConnectionState::Backoff);
                return;
            }
        };
        info!(installed = installed.len(), attempt = self.attempts, "rules synced");

        match self.listener.open_stream().await {
            Ok(Some(handle)) => {
                let listener = self.listener.clone();
                self.worker = Some(tokio::spawn(async move { listener.consume(handle).await }));
                self.transition(ConnectionState::Streaming);
            }
            Ok(None) => {
                info!(attempt = self.attempts, "stream rate limited, retrying next cycle");
                self.transition(ConnectionState::Backoff);
            }
            Err(e) => {
                warn!(error = %e, attempt = self.attempts, "stream open failed");
                self.transition(ConnectionState::Backoff);
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
        }
    }
}

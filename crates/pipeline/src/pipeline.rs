//! The enrichment pipeline: pull → parse → enrich → batch → append.
//!
//! Built with [`PipelineBuilder`]. Every pulled message ends in exactly one
//! of four outcomes: acked after its batch was appended, acked and dropped
//! because it is malformed, acked and dropped because the warehouse refused
//! its row, or nacked for redelivery.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trendwire_bus::{BusMessage, MicroBatcher, Subscriber};
use trendwire_core::EnrichedRecord;

use crate::error::PipelineError;
use crate::sentiment::SentimentEnricher;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::transform::{parse_batch, ParsedMessage};
use crate::warehouse::WarehouseSink;

/// An enriched record waiting in the warehouse batch.
struct Pending {
    ack_id: String,
    record: EnrichedRecord,
}

pub struct PipelineBuilder {
    source: Option<Arc<dyn Subscriber>>,
    enricher: Option<SentimentEnricher>,
    sink: Option<WarehouseSink>,
    concurrency: usize,
    pull_max_messages: u32,
    batch_size: usize,
    batch_wait: Duration,
    idle_wait: Duration,
    stats_interval: Duration,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            source: None,
            enricher: None,
            sink: None,
            concurrency: 8,
            pull_max_messages: 100,
            batch_size: 500,
            batch_wait: Duration::from_secs(2),
            idle_wait: Duration::from_secs(1),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscription the pipeline pulls from.
    pub fn source(mut self, source: Arc<dyn Subscriber>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn enricher(mut self, enricher: SentimentEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn sink(mut self, sink: WarehouseSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sentiment calls in flight at once (default: 8).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Messages requested per pull (default: 100).
    pub fn pull_max_messages(mut self, max: u32) -> Self {
        self.pull_max_messages = max.max(1);
        self
    }

    /// Rows per warehouse append (default: 500).
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Longest a row waits before its batch is appended (default: 2s).
    pub fn batch_wait(mut self, wait: Duration) -> Self {
        self.batch_wait = wait;
        self
    }

    /// Pause after an empty or failed pull (default: 1s).
    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    /// How often counters are logged (default: 60s).
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        Ok(Pipeline {
            source: self.source.ok_or(PipelineError::MissingStage("source"))?,
            enricher: self.enricher.ok_or(PipelineError::MissingStage("enricher"))?,
            sink: self.sink.ok_or(PipelineError::MissingStage("sink"))?,
            concurrency: self.concurrency,
            pull_max_messages: self.pull_max_messages,
            batch_size: self.batch_size,
            batch_wait: self.batch_wait,
            idle_wait: self.idle_wait,
            stats_interval: self.stats_interval,
            stats: Arc::new(PipelineStats::new()),
        })
    }
}

pub struct Pipeline {
    source: Arc<dyn Subscriber>,
    enricher: SentimentEnricher,
    sink: WarehouseSink,
    concurrency: usize,
    pull_max_messages: u32,
    batch_size: usize,
    batch_wait: Duration,
    idle_wait: Duration,
    stats_interval: Duration,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Run until `cancel` fires, then append whatever is still batched.
    pub async fn run(&self, cancel: CancellationToken) -> StatsSnapshot {
        info!(
            concurrency = self.concurrency,
            batch_size = self.batch_size,
            batch_wait_ms = self.batch_wait.as_millis() as u64,
            "enrichment pipeline started"
        );

        let mut batcher: MicroBatcher<Pending> =
            MicroBatcher::new(self.batch_size, self.batch_wait);
        let mut last_report = Instant::now();

        loop {
            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pulled = self.source.pull(self.pull_max_messages) => pulled,
            };

            let mut idle = match pulled {
                Ok(messages) if messages.is_empty() => true,
                // Back off as well when everything went back to the bus.
                Ok(messages) => !self.process(messages, &mut batcher).await,
                Err(e) => {
                    warn!(error = %e, "pull failed");
                    true
                }
            };

            if let Some(batch) = batcher.try_flush() {
                if !self.write(batch).await {
                    idle = true;
                }
            }

            if last_report.elapsed() >= self.stats_interval {
                info!(stats = %self.stats.snapshot(), "pipeline progress");
                last_report = Instant::now();
            }

            if idle {
                let wait = batcher
                    .remaining_wait()
                    .map_or(self.idle_wait, |due| due.min(self.idle_wait));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        if !batcher.is_empty() {
            info!(pending = batcher.len(), "draining pending batch");
            if !self.write(batcher.flush()).await {
                warn!("final batch was returned to the bus");
            }
        }

        let snapshot = self.stats.snapshot();
        info!(stats = %snapshot, "enrichment pipeline stopped");
        snapshot
    }

    /// Parse, enrich and buffer one pulled batch, appending each batch that
    /// fills up on the way. Returns `false` when nothing made it through.
    async fn process(
        &self,
        messages: Vec<BusMessage>,
        batcher: &mut MicroBatcher<Pending>,
    ) -> bool {
        self.stats.add_received(messages.len());
        debug!(count = messages.len(), "processing pulled messages");

        let total = messages.len();
        let (parsed, rejected) = parse_batch(messages);
        if !rejected.is_empty() {
            self.stats.add_malformed(rejected.len());
            self.ack(rejected.into_iter().map(|r| r.ack_id).collect()).await;
        }

        let enricher = &self.enricher;
        let results: Vec<_> = stream::iter(parsed)
            .map(|ParsedMessage { ack_id, message_id, record }| async move {
                (ack_id, message_id, enricher.enrich(record).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut failed = Vec::new();
        let mut appends_ok = true;
        for (ack_id, message_id, result) in results {
            match result {
                Ok(record) => {
                    if record.is_enriched() {
                        self.stats.add_enriched(1);
                    } else {
                        self.stats.add_unenriched(1);
                    }
                    batcher.push([Pending { ack_id, record }]);
                    if let Some(batch) = batcher.try_flush() {
                        appends_ok &= self.write(batch).await;
                    }
                }
                Err(e) => {
                    warn!(
                        message_id = %message_id,
                        error = %e,
                        "enrichment failed, returning message to the bus"
                    );
                    failed.push(ack_id);
                }
            }
        }

        let progressed = total - failed.len();
        if !failed.is_empty() {
            self.stats.add_enrich_failed(failed.len());
            self.nack(failed).await;
        }
        progressed > 0 && appends_ok
    }

    /// Append a batch and settle its messages. `false` when it went back to
    /// the bus.
    ///
    /// Rows the warehouse refuses outright are acked and counted as rejected;
    /// resending them could never succeed.
    async fn write(&self, batch: Vec<Pending>) -> bool {
        let (ack_ids, records): (Vec<String>, Vec<EnrichedRecord>) =
            batch.into_iter().map(|p| (p.ack_id, p.record)).unzip();

        match self.sink.append(&records).await {
            Ok(report) => {
                for &position in &report.rejected {
                    warn!(id = records[position].id(), "row refused by the warehouse, dropped");
                }
                self.stats.add_written(report.written);
                self.stats.add_rejected(report.rejected.len());
                self.ack(ack_ids).await;
                true
            }
            Err(e) if e.is_permanent() => {
                error!(rows = records.len(), error = %e, "warehouse refused the batch");
                self.stats.add_rejected(records.len());
                self.ack(ack_ids).await;
                true
            }
            Err(e) => {
                error!(rows = records.len(), error = %e, "append failed, returning batch");
                self.stats.add_write_failed(records.len());
                self.nack(ack_ids).await;
                false
            }
        }
    }

    async fn ack(&self, ack_ids: Vec<String>) {
        if ack_ids.is_empty() {
            return;
        }
        if let Err(e) = self.source.ack(&ack_ids).await {
            warn!(count = ack_ids.len(), error = %e, "ack failed, messages will be redelivered");
        }
    }

    async fn nack(&self, ack_ids: Vec<String>) {
        if ack_ids.is_empty() {
            return;
        }
        if let Err(e) = self.source.nack(&ack_ids).await {
            warn!(
                count = ack_ids.len(),
                error = %e,
                "nack failed, messages redeliver after the ack deadline"
            );
        }
    }
}

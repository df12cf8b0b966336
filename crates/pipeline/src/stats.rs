//! Running counters for the enrichment pipeline.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated from the pipeline loop.
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    malformed: AtomicU64,
    enriched: AtomicU64,
    unenriched: AtomicU64,
    enrich_failed: AtomicU64,
    written: AtomicU64,
    write_failed: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages pulled from the bus.
    pub received: u64,
    /// Dropped because the payload did not parse.
    pub malformed: u64,
    pub enriched: u64,
    /// Stored without sentiment (unsupported input).
    pub unenriched: u64,
    /// Nacked because the sentiment call failed.
    pub enrich_failed: u64,
    pub written: u64,
    /// Nacked because the warehouse append failed and may succeed later.
    pub write_failed: u64,
    /// Acked and dropped because the warehouse refused the row itself.
    pub rejected: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_received(&self, n: usize) {
        self.received.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_malformed(&self, n: usize) {
        self.malformed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_enriched(&self, n: usize) {
        self.enriched.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_unenriched(&self, n: usize) {
        self.unenriched.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_enrich_failed(&self, n: usize) {
        self.enrich_failed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, n: usize) {
        self.written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_write_failed(&self, n: usize) {
        self.write_failed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_rejected(&self, n: usize) {
        self.rejected.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            unenriched: self.unenriched.load(Ordering::Relaxed),
            enrich_failed: self.enrich_failed.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            write_failed: self.write_failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} malformed={} enriched={} unenriched={} enrich_failed={} ",
            self.received, self.malformed, self.enriched, self.unenriched, self.enrich_failed
        )?;
        write!(
            f,
            "written={} write_failed={} rejected={}",
            self.written, self.write_failed, self.rejected
        )
    }
}

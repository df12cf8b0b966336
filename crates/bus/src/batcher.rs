//! Micro-batch accumulator.
//!
//! Collects items and flushes when either the size threshold or time window
//! is reached, whichever comes first. Used on both sides of the bus: the
//! publisher batches outgoing payloads and the pipeline batches warehouse rows.

use std::time::Duration;

use tokio::time::Instant;

/// Accumulates items into micro-batches.
pub struct MicroBatcher<T> {
    buffer: Vec<T>,
    max_size: usize,
    max_wait: Duration,
    batch_started: Option<Instant>,
}

impl<T> MicroBatcher<T> {
    /// Create a new batcher with the given size and time thresholds.
    ///
    /// - `max_size`: flush when this many items are buffered.
    /// - `max_wait`: flush when this duration has elapsed since the first
    ///   item in the current batch was pushed.
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            max_wait,
            batch_started: None,
        }
    }

    /// Add items to the current batch.
    ///
    /// Starts the batch timer on the first non-empty push.
    pub fn push(&mut self, items: impl IntoIterator<Item = T>) {
        let before = self.buffer.len();
        self.buffer.extend(items);
        if self.batch_started.is_none() && self.buffer.len() > before {
            self.batch_started = Some(Instant::now());
        }
    }

    /// Whether the buffer has reached `max_size` or `max_wait` has elapsed
    /// since the batch started.
    pub fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if self.buffer.len() >= self.max_size {
            return true;
        }
        matches!(self.batch_started, Some(started) if started.elapsed() >= self.max_wait)
    }

    /// Flush the current batch, returning all accumulated items.
    pub fn flush(&mut self) -> Vec<T> {
        self.batch_started = None;
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_size))
    }

    /// Flush only if thresholds are met, otherwise return `None`.
    pub fn try_flush(&mut self) -> Option<Vec<T>> {
        if self.should_flush() {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Time left before the current batch is due, `None` when empty.
    pub fn remaining_wait(&self) -> Option<Duration> {
        self.batch_started
            .map(|started| self.max_wait.saturating_sub(started.elapsed()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_on_size() {
        let mut batcher = MicroBatcher::new(3, Duration::from_secs(60));
        batcher.push(0..3);
        assert!(batcher.should_flush());
    }

    #[test]
    fn test_no_flush_below_size() {
        let mut batcher = MicroBatcher::new(5, Duration::from_secs(60));
        batcher.push(0..2);
        assert!(!batcher.should_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timeout() {
        let mut batcher = MicroBatcher::new(100, Duration::from_millis(10));
        batcher.push([1]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(batcher.should_flush());
    }

    #[test]
    fn test_try_flush_returns_none_when_not_ready() {
        let mut batcher = MicroBatcher::new(10, Duration::from_secs(60));
        batcher.push(0..2);
        assert!(batcher.try_flush().is_none());
    }

    #[test]
    fn test_try_flush_returns_some_when_ready() {
        let mut batcher = MicroBatcher::new(2, Duration::from_secs(60));
        batcher.push(["a", "b"]);
        let batch = batcher.try_flush();
        assert_eq!(batch, Some(vec!["a", "b"]));
    }

    #[test]
    fn test_flush_resets_state() {
        let mut batcher = MicroBatcher::new(2, Duration::from_secs(60));
        batcher.push(0..3);
        let flushed = batcher.flush();
        assert_eq!(flushed.len(), 3);
        assert!(batcher.is_empty());
        assert!(!batcher.should_flush());
        assert_eq!(batcher.remaining_wait(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_push_no_timer() {
        let mut batcher: MicroBatcher<u32> = MicroBatcher::new(5, Duration::from_millis(1));
        batcher.push(Vec::new());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!batcher.should_flush());
        assert_eq!(batcher.remaining_wait(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_wait_counts_down() {
        let mut batcher = MicroBatcher::new(10, Duration::from_millis(100));
        batcher.push([1]);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let remaining = batcher.remaining_wait().unwrap();
        assert!(remaining <= Duration::from_millis(60));
        assert!(remaining > Duration::from_millis(50));
    }

    #[test]
    fn test_multiple_pushes_accumulate_in_order() {
        let mut batcher = MicroBatcher::new(10, Duration::from_secs(60));
        batcher.push([1, 2]);
        batcher.push([3, 4, 5]);
        assert_eq!(batcher.len(), 5);
        assert_eq!(batcher.flush(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut batcher = MicroBatcher::new(0, Duration::from_secs(60));
        batcher.push([1]);
        assert!(batcher.should_flush());
    }
}

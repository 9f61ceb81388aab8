//! Adaptive batch scheduling
//!
//! Partitions a work list into batches sized to hit a target duration:
//! consistently fast batches grow the size, slow ones shrink it, and a
//! failed batch is retried at half size without advancing the cursor. A
//! batch that still fails at the minimum size is abandoned so the run
//! always makes forward progress.

use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};

/// Tuning for the adaptive batcher
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Duration one batch should take
    pub target_duration: std::time::Duration,
    /// Fraction of the current size a grow/shrink step moves by
    pub adjustment_factor: f64,
    /// Rolling history length
    pub history_limit: usize,
    /// Pause between batches, also a cancellation point
    pub pacing_delay: std::time::Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 100,
            target_duration: std::time::Duration::from_secs(2),
            adjustment_factor: 0.3,
            history_limit: 20,
            pacing_delay: std::time::Duration::from_millis(100),
        }
    }
}

/// One observed batch, kept in the rolling history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRecord {
    pub size: usize,
    pub duration: std::time::Duration,
    pub success: bool,
}

/// Processes one batch of items.
///
/// A returned error fails the whole batch and triggers the batcher's
/// shrink-and-retry path; per-item problems the processor can absorb
/// should be recorded by the processor itself instead.
#[async_trait]
pub trait BatchProcessor<T: Send + Sync>: Send {
    async fn process(&mut self, batch: &[T]) -> Result<()>;
}

/// Result of a batched run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub batches_run: usize,
    pub items_processed: usize,
    /// Indices of items in batches abandoned after failing at minimum size
    pub abandoned: Vec<usize>,
}

/// Duration-adaptive batcher
pub struct AdaptiveBatcher {
    config: BatchConfig,
    current_size: usize,
    history: VecDeque<BatchRecord>,
}

impl AdaptiveBatcher {
    pub fn new(config: BatchConfig) -> Self {
        let current_size = (config.min_size + config.max_size) / 2;
        Self {
            config,
            current_size,
            history: VecDeque::new(),
        }
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn history(&self) -> impl Iterator<Item = &BatchRecord> {
        self.history.iter()
    }

    /// Size of the successful batch whose duration came closest to the
    /// target, for callers that want a stable size instead of continuous
    /// adaptation.
    pub fn best_observed_size(&self) -> Option<usize> {
        self.history
            .iter()
            .filter(|r| r.success)
            .min_by(|a, b| {
                let da = distance_to_target(a.duration, self.config.target_duration);
                let db = distance_to_target(b.duration, self.config.target_duration);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|r| r.size)
    }

    /// Run `processor` over `items` in adaptively sized batches.
    ///
    /// `on_progress` is called with (processed, total) after each batch.
    /// Items are consumed strictly in order; batching changes grouping,
    /// never order.
    pub async fn process_batches<T: Send + Sync>(
        &mut self,
        items: &[T],
        processor: &mut dyn BatchProcessor<T>,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> Result<BatchReport> {
        let total = items.len();
        let mut report = BatchReport::default();
        let mut cursor = 0;
        // Whether the batch at the current cursor already failed at the
        // smallest size it can run at; reset whenever the cursor moves.
        let mut failed_at_floor = false;

        while cursor < total {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let size = self.current_size.min(total - cursor);
            let batch = &items[cursor..cursor + size];

            let started = Instant::now();
            let outcome = processor.process(batch).await;
            let duration = started.elapsed();
            report.batches_run += 1;

            match outcome {
                Ok(()) => {
                    self.record(size, duration, true);
                    self.adjust(duration);
                    cursor += size;
                    report.items_processed += size;
                    failed_at_floor = false;
                    on_progress(cursor, total);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    self.record(size, duration, false);
                    if size > self.config.min_size {
                        // Retry the same items at half size.
                        self.current_size = (size / 2).max(self.config.min_size);
                        warn!(
                            "Batch of {} failed ({}); retrying at size {}",
                            size, e, self.current_size
                        );
                    } else if !failed_at_floor {
                        // A tail batch can start below min_size; every
                        // batch still gets one retry at the floor before
                        // its items are given up on.
                        failed_at_floor = true;
                        warn!(
                            "Batch of {} failed at minimum size ({}); retrying once",
                            size, e
                        );
                    } else {
                        // Failed twice at the floor: abandon to keep moving.
                        warn!(
                            "Batch of {} failed again at minimum size ({}); abandoning",
                            size, e
                        );
                        report.abandoned.extend(cursor..cursor + size);
                        cursor += size;
                        failed_at_floor = false;
                        on_progress(cursor, total);
                    }
                }
            }

            if cursor < total && !self.config.pacing_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = sleep(self.config.pacing_delay) => {}
                }
            }
        }

        Ok(report)
    }

    fn record(&mut self, size: usize, duration: std::time::Duration, success: bool) {
        self.history.push_back(BatchRecord {
            size,
            duration,
            success,
        });
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }

    /// Grow on fast batches, shrink on slow ones, hold inside the band.
    fn adjust(&mut self, duration: std::time::Duration) {
        let ratio = duration.as_secs_f64() / self.config.target_duration.as_secs_f64();
        let step = (self.current_size as f64 * self.config.adjustment_factor).ceil() as usize;
        let step = step.max(1);

        let next = if ratio < 0.8 {
            (self.current_size + step).min(self.config.max_size)
        } else if ratio > 1.2 {
            self.current_size.saturating_sub(step).max(self.config.min_size)
        } else {
            self.current_size
        };

        if next != self.current_size {
            debug!(
                "Batch size {} -> {} (ratio {:.2})",
                self.current_size, next, ratio
            );
            self.current_size = next;
        }
    }
}

fn distance_to_target(duration: std::time::Duration, target: std::time::Duration) -> f64 {
    (duration.as_secs_f64() / target.as_secs_f64() - 1.0).abs()
}

//! Rolling success/failure counters split into time buckets.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Absolute bucket index since `origin`; stale when it falls outside the window.
    epoch: u64,
    success: u64,
    failure: u64,
}

/// Sliding window of `buckets` slots, each covering `bucket_duration`.
///
/// Not synchronized; the owning breaker guards it.
#[derive(Debug)]
pub struct RollingWindow {
    origin: Instant,
    bucket_duration: Duration,
    buckets: Vec<Bucket>,
}

impl RollingWindow {
    pub fn new(bucket_duration: Duration, buckets: u32) -> Self {
        Self {
            origin: Instant::now(),
            bucket_duration: bucket_duration.max(Duration::from_nanos(1)),
            buckets: vec![Bucket::default(); buckets.max(1) as usize],
        }
    }

    fn epoch_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        (elapsed / self.bucket_duration.as_nanos()) as u64
    }

    fn slot(&mut self, now: Instant) -> &mut Bucket {
        let epoch = self.epoch_at(now);
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(epoch % len) as usize];
        if bucket.epoch != epoch {
            *bucket = Bucket {
                epoch,
                ..Bucket::default()
            };
        }
        bucket
    }

    pub fn record(&mut self, success: bool, now: Instant) {
        let bucket = self.slot(now);
        if success {
            bucket.success += 1;
        } else {
            bucket.failure += 1;
        }
    }

    /// `(successes, failures)` over the buckets still inside the window.
    pub fn totals(&self, now: Instant) -> (u64, u64) {
        let current = self.epoch_at(now);
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.epoch <= current && current - b.epoch < len)
            .filter(|b| b.success + b.failure > 0)
            .fold((0, 0), |(s, f), b| (s + b.success, f + b.failure))
    }

    pub fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}

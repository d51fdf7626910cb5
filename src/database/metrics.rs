//! Pool health sampling.
//!
//! A sampler task records a [`PoolSample`] every 30 s; the last 1,024
//! samples are retained in a ring for introspection. Acquire timings
//! and waiter counts are fed in by the manager's acquire path.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Retained sample count.
pub const SAMPLE_RING_CAPACITY: usize = 1_024;

/// One timestamped pool observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSample {
    pub at: DateTime<Utc>,
    pub active: u32,
    pub idle: u32,
    pub waiters: u32,
    pub errors: u64,
    pub mean_acquire_ms: f64,
}

/// Shared counters plus the sample ring.
#[derive(Default)]
pub struct PoolMetrics {
    waiters: AtomicU32,
    errors: AtomicU64,
    acquire_count: AtomicU64,
    acquire_total_micros: AtomicU64,
    ring: Mutex<VecDeque<PoolSample>>,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a caller entering the acquire wait. Returns a guard that
    /// decrements on drop so cancelled acquisitions are not leaked into
    /// the gauge.
    pub fn enter_wait(&self) -> WaitGuard<'_> {
        self.waiters.fetch_add(1, Ordering::Relaxed);
        WaitGuard { metrics: self }
    }

    pub fn record_acquire(&self, waited: Duration, ok: bool) {
        if ok {
            self.acquire_count.fetch_add(1, Ordering::Relaxed);
            self.acquire_total_micros
                .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn waiters(&self) -> u32 {
        self.waiters.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn mean_acquire_ms(&self) -> f64 {
        let count = self.acquire_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.acquire_total_micros.load(Ordering::Relaxed);
        (total as f64 / count as f64) / 1_000.0
    }

    /// Record one observation of the pool's current shape.
    pub fn push_sample(&self, size: u32, idle: u32) {
        let sample = PoolSample {
            at: Utc::now(),
            active: size.saturating_sub(idle),
            idle,
            waiters: self.waiters(),
            errors: self.errors(),
            mean_acquire_ms: self.mean_acquire_ms(),
        };
        let mut ring = self.ring.lock().expect("metrics mutex poisoned");
        if ring.len() >= SAMPLE_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> Vec<PoolSample> {
        self.ring
            .lock()
            .expect("metrics mutex poisoned")
            .iter()
            .copied()
            .collect()
    }
}

/// Decrements the waiter gauge on drop.
pub struct WaitGuard<'a> {
    metrics: &'a PoolMetrics,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.metrics.waiters.fetch_sub(1, Ordering::Relaxed);
    }
}

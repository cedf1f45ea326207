//! Session counters and the cycle trail.
//!
//! Two paths, both safe to touch from the hot loop:
//! - **SessionStats:** atomic counters shared by coordinator, recorder and
//!   the end-of-session summary.
//! - **CycleTrail:** lock-free bounded queue of per-cycle duration samples,
//!   drained once at session end for the summary statistics. Pushes never
//!   block; when the trail is full the sample is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

const TRAIL_CAPACITY: usize = 16_384;

/// Cumulative counters for one recording session.
#[derive(Default)]
pub struct SessionStats {
    pub cycles: AtomicU64,
    pub miss_cycles: AtomicU64,
    pub overruns: AtomicU64,
    pub reconnects: AtomicU64,
    /// Session elapsed time, f64 bits. Written by the coordinator once per
    /// cycle, read by the recorder for timestamps and rotation.
    elapsed_bits: AtomicU64,
}

impl SessionStats {
    pub fn set_elapsed(&self, secs: f64) {
        self.elapsed_bits.store(secs.to_bits(), Ordering::Release);
    }

    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.elapsed_bits.load(Ordering::Acquire))
    }

    /// Share of cycles that contained at least one missed read, percent.
    pub fn percent_missed(&self) -> f64 {
        let cycles = self.cycles.load(Ordering::Relaxed);
        if cycles == 0 {
            return 0.0;
        }
        self.miss_cycles.load(Ordering::Relaxed) as f64 / cycles as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSample {
    pub seq: u64,
    pub duration_us: u64,
}

pub struct CycleTrail {
    queue: ArrayQueue<CycleSample>,
    dropped: AtomicU64,
}

impl CycleTrail {
    pub fn new() -> Self {
        Self {
            queue: ArrayQueue::new(TRAIL_CAPACITY),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, sample: CycleSample) {
        if self.queue.push(sample).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn drain(&self) -> Vec<CycleSample> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(s) = self.queue.pop() {
            out.push(s);
        }
        out
    }
}

impl Default for CycleTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Min/max/mean over a set of samples.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn duration_stats(samples: &[CycleSample]) -> Option<Stats> {
    if samples.is_empty() {
        return None;
    }
    let count = samples.len();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for s in samples {
        let v = s.duration_us as f64;
        min = min.min(v);
        max = max.max(v);
        sum += v;
    }
    Some(Stats {
        min,
        max,
        mean: sum / count as f64,
        count,
    })
}

//! Session trigger.
//!
//! A recording session runs while the trigger is high. On the rig this is a
//! physical switch; here it is a trait with a manual latch (embedding,
//! tests) and a timed variant (the headless binary records for a configured
//! duration, as the bench-test builds of the original rig did).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub trait Trigger: Send + Sync {
    fn is_high(&self) -> bool;
}

/// Latch flipped from another thread or from test code.
#[derive(Default)]
pub struct ManualTrigger {
    high: AtomicBool,
}

impl ManualTrigger {
    pub fn new(high: bool) -> Self {
        Self {
            high: AtomicBool::new(high),
        }
    }

    pub fn set(&self, high: bool) {
        self.high.store(high, Ordering::Release);
    }
}

impl Trigger for ManualTrigger {
    fn is_high(&self) -> bool {
        self.high.load(Ordering::Acquire)
    }
}

/// High from arming until the duration runs out.
pub struct TimedTrigger {
    armed_at: Instant,
    duration: Duration,
}

impl TimedTrigger {
    pub fn arm(duration: Duration) -> Self {
        Self {
            armed_at: Instant::now(),
            duration,
        }
    }
}

impl Trigger for TimedTrigger {
    fn is_high(&self) -> bool {
        self.armed_at.elapsed() < self.duration
    }
}

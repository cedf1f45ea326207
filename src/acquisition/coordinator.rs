//! Cycle coordinator.
//!
//! Runs the fixed-rate loop on the main thread. Pacing comes from a
//! dedicated ticker thread that posts cycle-boundary events into a
//! bounded(1) channel; the coordinator consumes them through a small state
//! machine (WAITING, COLLECTING, ERROR). A tick found already pending when
//! the coordinator comes back around means the previous cycle overran.
//!
//! Per cycle: advance elapsed time by the wall-clock delta (absorbing
//! jitter rather than accumulating the nominal period), request a poll from
//! every connected channel whose worker is parked, busy-wait those polls
//! back to idle, then hand the cycle to the recorder and check the miss
//! thresholds. A worker still busy from an earlier cycle is skipped, not
//! waited on; its channel keeps reconciling as misses until it re-announces
//! readiness. When a connected sensor's natural scan is as long as the
//! cycle (the EMG band), the end-of-cycle wait is skipped outright: that
//! sensor's own poll already paces the loop.
//!
//! Recovery is deliberately synchronous and allowed to overrun the cycle:
//! correctness of reconnection outranks cycle-timing purity.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, bounded};
use log::{error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

use super::channel::SensorChannel;
use super::reconnect::RetryPolicy;
use crate::config::{Config, ExhaustionPolicy};
use crate::error::SessionError;
use crate::metrics::{CycleSample, CycleTrail, SessionStats};
use crate::recording::recorder::Recorder;
use crate::status::Lamps;
use crate::trigger::Trigger;

enum CycleState {
    Waiting,
    Collecting,
    Error,
}

pub struct Coordinator {
    channels: Arc<Vec<Arc<dyn SensorChannel>>>,
    stats: Arc<SessionStats>,
    trail: Arc<CycleTrail>,
    lamps: Arc<dyn Lamps>,
    period: Duration,
    miss_limit: u32,
    retry: RetryPolicy,
    exhaustion: ExhaustionPolicy,
    elapsed: f64,
    last_tick: Instant,
    cycle_seq: u64,
    requested: Vec<bool>,
    tick_rx: Receiver<Instant>,
    ticker: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        channels: Arc<Vec<Arc<dyn SensorChannel>>>,
        stats: Arc<SessionStats>,
        trail: Arc<CycleTrail>,
        lamps: Arc<dyn Lamps>,
        config: &Config,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        let period = config.cycle_period();
        let (tick_tx, tick_rx) = bounded::<Instant>(1);

        let ticker = std::thread::Builder::new()
            .name("CycleTicker".to_string())
            .spawn(move || {
                let sleeper =
                    SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
                while !shutdown.load(Ordering::Acquire) {
                    sleeper.sleep(period);
                    // Unconsumed boundaries are dropped; the coordinator
                    // counts a pending tick as one overrun regardless.
                    let _ = tick_tx.try_send(Instant::now());
                }
            })
            .map_err(|source| SessionError::ThreadSpawn {
                name: "CycleTicker",
                source,
            })?;

        let requested = vec![false; channels.len()];
        Ok(Self {
            channels,
            stats,
            trail,
            lamps,
            period,
            miss_limit: config.consecutive_miss_limit,
            retry: RetryPolicy::new(config.reconnect_attempts, config.reconnect_backoff()),
            exhaustion: config.exhaustion_policy,
            elapsed: 0.0,
            last_tick: Instant::now(),
            cycle_seq: 0,
            requested,
            tick_rx,
            ticker: Some(ticker),
        })
    }

    /// Drive the loop until the trigger drops or a sensor loss turns fatal.
    pub fn run(&mut self, trigger: &dyn Trigger, recorder: &Recorder) -> Result<(), SessionError> {
        if !trigger.is_high() {
            return Ok(());
        }
        info!("[Coordinator] collecting data");
        self.last_tick = Instant::now();

        let mut state = CycleState::Collecting;
        loop {
            state = match state {
                CycleState::Waiting => {
                    if !trigger.is_high() {
                        break;
                    }
                    self.await_cycle_boundary();
                    CycleState::Collecting
                }
                CycleState::Collecting => {
                    if self.collect_cycle(recorder) {
                        CycleState::Error
                    } else {
                        CycleState::Waiting
                    }
                }
                CycleState::Error => {
                    self.recover()?;
                    CycleState::Waiting
                }
            };
        }

        // Let the in-flight record land before the session tears down.
        recorder.wait_until_idle();
        info!("[Coordinator] recording stopped after {} cycles", self.cycle_seq);
        Ok(())
    }

    /// One COLLECTING step. Returns true when any channel is over the
    /// consecutive-miss threshold and the ERROR state should run.
    pub fn collect_cycle(&mut self, recorder: &Recorder) -> bool {
        let now = Instant::now();
        self.elapsed += now.duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        self.stats.set_elapsed(self.elapsed);
        self.cycle_seq += 1;

        let work_start = Instant::now();

        for (i, channel) in self.channels.iter().enumerate() {
            self.requested[i] = channel.is_connected() && channel.request_poll(self.elapsed);
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if self.requested[i] {
                channel.wait_until_idle();
            }
        }

        // Previous record must be done before this one is kicked off; that
        // bound is what keeps reconciliation within one cycle.
        recorder.wait_until_idle();
        recorder.signal();

        self.trail.record(CycleSample {
            seq: self.cycle_seq,
            duration_us: work_start.elapsed().as_micros() as u64,
        });

        self.channels
            .iter()
            .any(|ch| ch.is_connected() && ch.counters().consecutive_errors > self.miss_limit)
    }

    /// ERROR state: reconnect every channel over the threshold, applying the
    /// configured exhaustion policy. Takes seconds; the cycle overruns.
    pub fn recover(&mut self) -> Result<(), SessionError> {
        self.lamps.set_ok(false);
        self.lamps.set_error(true);

        for channel in self.channels.iter() {
            if !channel.is_connected() {
                continue;
            }
            let consecutive = channel.counters().consecutive_errors;
            if consecutive <= self.miss_limit {
                continue;
            }

            warn!(
                "[{}] {} consecutive missed reads, reconnecting",
                channel.kind(),
                consecutive
            );
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);

            match self.retry.start_with_retries(&**channel) {
                Ok(()) => info!("[{}] reconnected", channel.kind()),
                Err(e) => {
                    error!("[{}] could not reconnect: {}", channel.kind(), e);
                    match self.exhaustion {
                        ExhaustionPolicy::Degrade => {
                            channel.disable();
                            warn!("[{}] disabled, continuing without it", channel.kind());
                        }
                        ExhaustionPolicy::EndSession => {
                            return Err(SessionError::SensorLost(channel.kind()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// WAITING state: block until the ticker posts the next cycle boundary.
    fn await_cycle_boundary(&mut self) {
        if self.cycle_wait_redundant() {
            while self.tick_rx.try_recv().is_ok() {}
            return;
        }
        match self.tick_rx.try_recv() {
            Ok(_) => {
                // The boundary passed while we were still collecting.
                self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                let _ = self.tick_rx.recv();
            }
        }
    }

    /// True while a connected sensor's own scan is at least one period long.
    fn cycle_wait_redundant(&self) -> bool {
        self.channels
            .iter()
            .any(|ch| ch.is_connected() && ch.nominal_poll_duration() >= self.period)
    }

    pub fn cycles_run(&self) -> u64 {
        self.cycle_seq
    }

    /// Join the ticker thread. The session raises the shutdown flag first.
    pub fn join_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
    }
}

//! Double-buffered sensor channel.
//!
//! One channel per sensor, shared between exactly two parties: the device
//! worker thread (write side) and the coordinator/recorder (read side).
//! Two reading slots alternate roles every poll. The worker fills the slot
//! `write_slot` points at and flips the pointer after each attempt; the
//! reconciler always consumes the complement, so neither side ever touches
//! the slot the other is using. Slot contents are guarded by per-slot
//! mutexes that are uncontended by this alternation; the only lock both
//! sides meet on is the control cell, and only for the time it takes to
//! flip a flag.
//!
//! Control flag protocol (single writer per transition):
//! - coordinator: READY -> REQUESTED (request_poll)
//! - worker:      REQUESTED -> WORKING -> READY
//!
//! The coordinator's wait is a busy-spin on the atomic state with no
//! blocking primitive. It has to return within microseconds; a blocking
//! wait would add scheduler latency to every cycle. `wait_until_idle`
//! isolates the spin so a futex-style backend could replace it without
//! touching callers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::config::MissSignal;
use crate::devices::{DeviceDriver, Handle, Sample, SensorKind};
use crate::error::DeviceError;

const WORKING: u8 = 0;
const REQUESTED: u8 = 1;
const READY: u8 = 2;

/// Outcome of one reconciliation: fresh data, or stale fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Hit,
    Miss,
}

/// Per-channel control flag plus the mutex/condvar pair used to hand the
/// worker its wakeups. The atomic state is readable without the lock, which
/// is what the coordinator's busy-poll relies on.
pub struct ControlCell {
    state: AtomicU8,
    lock: Mutex<()>,
    signal: Condvar,
}

impl ControlCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(WORKING),
            lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }

    /// Coordinator side: flag a request and wake the worker.
    pub fn request(&self) {
        let _guard = self.lock.lock();
        self.state.store(REQUESTED, Ordering::Release);
        self.signal.notify_one();
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Spin until the worker has consumed the pending request. Bounded by
    /// worker dispatch latency, not poll completion: the state leaves
    /// REQUESTED the moment the worker wakes.
    pub fn wait_dispatched(&self) {
        while self.state.load(Ordering::Acquire) == REQUESTED {
            std::hint::spin_loop();
        }
    }

    /// Spin until the worker is parked awaiting the next request.
    pub fn wait_until_idle(&self) {
        while !self.is_ready() {
            std::hint::spin_loop();
        }
    }

    /// Worker side: announce readiness, block until the next request (or
    /// shutdown), then mark the transition to working. Returns false on
    /// shutdown. A request that arrived while the worker was still polling
    /// is consumed immediately instead of being clobbered.
    pub(crate) fn announce_and_wait(&self, shutdown: &AtomicBool) -> bool {
        let mut guard = self.lock.lock();
        if self.state.load(Ordering::Acquire) != REQUESTED {
            self.state.store(READY, Ordering::Release);
        }
        while self.state.load(Ordering::Acquire) != REQUESTED {
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            self.signal.wait(&mut guard);
        }
        self.state.store(WORKING, Ordering::Release);
        true
    }

    /// Wake a parked worker without posting a request (shutdown path).
    pub fn wake(&self) {
        let _guard = self.lock.lock();
        self.signal.notify_all();
    }
}

struct Slot<R> {
    data: R,
    timestamp: f64,
    ready: bool,
}

/// Read-side bookkeeping. Counters change only at reconcile time, never in
/// the worker.
struct Ledger<R> {
    last_good: R,
    last_timestamp: f64,
    total_reads: u64,
    total_errors: u64,
    consecutive_errors: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCounters {
    pub total_reads: u64,
    pub total_errors: u64,
    pub consecutive_errors: u32,
}

struct DriverLink<D: DeviceDriver> {
    driver: D,
    handle: Option<Handle>,
}

/// The shared channel state. The worker thread and the session each hold an
/// `Arc` of this.
pub struct DeviceChannel<D: DeviceDriver> {
    kind: SensorKind,
    control: ControlCell,
    /// Session elapsed time for the in-flight request, f64 bits.
    cycle_time_bits: AtomicU64,
    /// Slot the worker fills next (or is filling). Written only by the
    /// worker; the reconciler reads the complement.
    write_slot: AtomicUsize,
    slots: [Mutex<Slot<D::Reading>>; 2],
    driver: Mutex<DriverLink<D>>,
    ledger: Mutex<Ledger<D::Reading>>,
    connected: AtomicBool,
    disabled: AtomicBool,
    miss_signal: MissSignal,
    nominal_poll: Duration,
    segment_len: usize,
}

impl<D: DeviceDriver> DeviceChannel<D> {
    pub fn new(driver: D, miss_signal: MissSignal) -> Arc<Self> {
        let blank = driver.blank_reading();
        let nominal_poll = driver.nominal_poll_duration();
        let segment_len = blank.byte_len();
        let slot = |data: D::Reading| {
            Mutex::new(Slot {
                data,
                timestamp: 0.0,
                ready: false,
            })
        };
        Arc::new(Self {
            kind: driver.kind(),
            control: ControlCell::new(),
            cycle_time_bits: AtomicU64::new(0),
            write_slot: AtomicUsize::new(0),
            slots: [slot(blank.clone()), slot(blank.clone())],
            driver: Mutex::new(DriverLink {
                driver,
                handle: None,
            }),
            ledger: Mutex::new(Ledger {
                last_good: blank,
                last_timestamp: 0.0,
                total_reads: 0,
                total_errors: 0,
                consecutive_errors: 0,
            }),
            connected: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            miss_signal,
            nominal_poll,
            segment_len,
        })
    }

    /// Worker thread body. Loops until the session shutdown flag is raised.
    pub fn run_worker(&self, shutdown: &AtomicBool) {
        debug!("[{}] worker up", self.kind);
        while self.control.announce_and_wait(shutdown) {
            let cycle_time = f64::from_bits(self.cycle_time_bits.load(Ordering::Acquire));
            let idx = self.write_slot.load(Ordering::Relaxed);

            let mut link = self.driver.lock();
            let DriverLink { driver, handle } = &mut *link;
            let result = match handle {
                Some(h) => {
                    let mut slot = self.slots[idx].lock();
                    slot.timestamp = cycle_time;
                    let result = driver.poll(*h, cycle_time, &mut slot.data);
                    slot.ready = match self.miss_signal {
                        // A failed poll leaves the slot un-flagged; absence of
                        // fresh data is the miss signal downstream.
                        MissSignal::ReturnCode => result.is_ok(),
                        // Legacy behavior: flag whatever the driver left in
                        // the buffer, success or not.
                        MissSignal::ReadyFlag => true,
                    };
                    result
                }
                None => Err(DeviceError::NotConnected),
            };
            drop(link);

            if let Err(e) = result {
                debug!("[{}] poll failed: {}", self.kind, e);
            }
            // The attempted slot becomes the read side, completed or not.
            self.write_slot.store(idx ^ 1, Ordering::Release);
        }
        debug!("[{}] worker stopped", self.kind);
    }
}

/// Object-safe face of a channel, what the coordinator, recorder and
/// reconnection policy work against.
pub trait SensorChannel: Send + Sync {
    fn kind(&self) -> SensorKind;
    fn is_connected(&self) -> bool;
    fn is_disabled(&self) -> bool;

    /// Post a poll request if the worker is parked. Returns false when the
    /// worker is still mid-poll from an earlier cycle; that cycle's
    /// reconciliation will simply miss.
    fn request_poll(&self, cycle_time: f64) -> bool;
    fn is_ready_for_request(&self) -> bool;
    /// Spin until the posted request has been picked up by the worker.
    fn wait_dispatched(&self);
    /// Spin until the worker is parked.
    fn wait_until_idle(&self);

    /// Flip to the read-side slot and consume it. On a miss the previous
    /// `last_good` reading is retained for the record.
    fn reconcile(&self) -> Reconciled;
    fn counters(&self) -> ChannelCounters;
    /// Cycle time the last reconciled slot was polled at (stale on a miss).
    fn last_timestamp(&self) -> f64;

    /// Width of this channel's record segment, constant for the session.
    fn segment_len(&self) -> usize;
    fn encode_last_good(&self, out: &mut Vec<u8>);

    fn try_connect(&self) -> Result<(), DeviceError>;
    /// Drop the current handle and connect again. Keeps `total_reads` and
    /// `total_errors`, zeroes `consecutive_errors` on success.
    fn reconnect(&self) -> Result<(), DeviceError>;
    fn disconnect(&self);
    /// Permanently exclude this channel for the rest of the session.
    fn disable(&self);

    fn nominal_poll_duration(&self) -> Duration;
    /// Wake a parked worker so it can observe the shutdown flag.
    fn wake_worker(&self);
}

impl<D: DeviceDriver> SensorChannel for DeviceChannel<D> {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    fn request_poll(&self, cycle_time: f64) -> bool {
        if !self.control.is_ready() {
            return false;
        }
        self.cycle_time_bits
            .store(cycle_time.to_bits(), Ordering::Release);
        self.control.request();
        true
    }

    fn is_ready_for_request(&self) -> bool {
        self.control.is_ready()
    }

    fn wait_dispatched(&self) {
        self.control.wait_dispatched();
    }

    fn wait_until_idle(&self) {
        self.control.wait_until_idle();
    }

    fn reconcile(&self) -> Reconciled {
        let mut ledger = self.ledger.lock();
        ledger.total_reads += 1;

        let read_idx = self.write_slot.load(Ordering::Acquire) ^ 1;
        let mut slot = self.slots[read_idx].lock();
        ledger.last_timestamp = slot.timestamp;

        if slot.ready {
            slot.ready = false;
            ledger.last_good.clone_from(&slot.data);
            ledger.consecutive_errors = 0;
            Reconciled::Hit
        } else {
            ledger.total_errors += 1;
            ledger.consecutive_errors += 1;
            Reconciled::Miss
        }
    }

    fn counters(&self) -> ChannelCounters {
        let ledger = self.ledger.lock();
        ChannelCounters {
            total_reads: ledger.total_reads,
            total_errors: ledger.total_errors,
            consecutive_errors: ledger.consecutive_errors,
        }
    }

    fn last_timestamp(&self) -> f64 {
        self.ledger.lock().last_timestamp
    }

    fn segment_len(&self) -> usize {
        self.segment_len
    }

    fn encode_last_good(&self, out: &mut Vec<u8>) {
        self.ledger.lock().last_good.write_bytes(out);
    }

    fn try_connect(&self) -> Result<(), DeviceError> {
        let mut link = self.driver.lock();
        let handle = link.driver.connect()?;
        link.handle = Some(handle);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn reconnect(&self) -> Result<(), DeviceError> {
        let mut link = self.driver.lock();
        if let Some(h) = link.handle.take() {
            link.driver.disconnect(h);
        }
        self.connected.store(false, Ordering::Release);

        let handle = link.driver.connect()?;
        link.handle = Some(handle);

        // Discard anything a pre-failure poll left behind.
        for slot in &self.slots {
            let mut s = slot.lock();
            s.ready = false;
            s.data.clear();
        }
        self.ledger.lock().consecutive_errors = 0;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn disconnect(&self) {
        let mut link = self.driver.lock();
        if let Some(h) = link.handle.take() {
            link.driver.disconnect(h);
        }
        self.connected.store(false, Ordering::Release);
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::Release);
        self.disconnect();
    }

    fn nominal_poll_duration(&self) -> Duration {
        self.nominal_poll
    }

    fn wake_worker(&self) {
        self.control.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testutil::{ScriptedDriver, TestReading};
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn test_channel() -> (Arc<DeviceChannel<ScriptedDriver>>, Arc<crate::devices::testutil::ScriptedState>) {
        let (driver, state) = ScriptedDriver::new(SensorKind::Force);
        let ch = DeviceChannel::new(driver, MissSignal::ReturnCode);
        ch.try_connect().unwrap();
        (ch, state)
    }

    /// Emulates one worker poll attempt without a thread: fill the write
    /// slot, flag it, flip. Mirrors the tail of `run_worker`.
    fn fake_poll(ch: &DeviceChannel<ScriptedDriver>, value: f32, ready: bool) {
        let idx = ch.write_slot.load(Ordering::Relaxed);
        {
            let mut slot = ch.slots[idx].lock();
            slot.data = TestReading([value, value]);
            slot.ready = ready;
        }
        ch.write_slot.store(idx ^ 1, Ordering::Release);
    }

    fn last_good(ch: &DeviceChannel<ScriptedDriver>) -> TestReading {
        ch.ledger.lock().last_good.clone()
    }

    #[test]
    fn reconcile_consumes_the_slot_last_written() {
        let (ch, _) = test_channel();
        for k in 1..=6 {
            fake_poll(&ch, k as f32, true);
            assert_eq!(ch.reconcile(), Reconciled::Hit);
            assert_eq!(last_good(&ch), TestReading([k as f32, k as f32]));
        }
    }

    #[test]
    fn read_side_is_always_the_write_complement() {
        let (ch, _) = test_channel();
        fake_poll(&ch, 1.0, true);
        assert_eq!(ch.reconcile(), Reconciled::Hit);

        // Worker stalls mid-poll: write_slot unchanged across many
        // reconciles. The read side must keep to the complement and report
        // misses rather than ever touching the in-flight slot.
        let writing = ch.write_slot.load(Ordering::Relaxed);
        for _ in 0..5 {
            let read_idx = ch.write_slot.load(Ordering::Acquire) ^ 1;
            assert_ne!(read_idx, writing);
            assert_eq!(ch.reconcile(), Reconciled::Miss);
        }
    }

    #[test]
    fn consecutive_errors_reset_on_hit_and_count_misses() {
        let (ch, _) = test_channel();

        fake_poll(&ch, 1.0, true);
        assert_eq!(ch.reconcile(), Reconciled::Hit);
        assert_eq!(ch.counters().consecutive_errors, 0);

        for expect in 1..=4 {
            fake_poll(&ch, 0.0, false);
            assert_eq!(ch.reconcile(), Reconciled::Miss);
            assert_eq!(ch.counters().consecutive_errors, expect);
        }

        fake_poll(&ch, 2.0, true);
        assert_eq!(ch.reconcile(), Reconciled::Hit);
        let c = ch.counters();
        assert_eq!(c.consecutive_errors, 0);
        assert_eq!(c.total_errors, 4);
        assert_eq!(c.total_reads, 6);
    }

    #[test]
    fn miss_keeps_last_good_reading() {
        let (ch, _) = test_channel();

        fake_poll(&ch, 7.0, true);
        assert_eq!(ch.reconcile(), Reconciled::Hit);

        for _ in 0..3 {
            fake_poll(&ch, 99.0, false);
            assert_eq!(ch.reconcile(), Reconciled::Miss);
            assert_eq!(last_good(&ch), TestReading([7.0, 7.0]));
        }

        let mut bytes = Vec::new();
        ch.encode_last_good(&mut bytes);
        assert_eq!(&bytes[..4], &7.0f32.to_le_bytes());
    }

    #[test]
    fn worker_thread_services_requests_and_shuts_down() {
        let (ch, state) = test_channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let ch = ch.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || ch.run_worker(&shutdown))
        };

        ch.wait_until_idle();
        for k in 1..=3 {
            assert!(ch.request_poll(k as f64 * 0.025));
            ch.wait_dispatched();
            ch.wait_until_idle();
            assert_eq!(ch.reconcile(), Reconciled::Hit);
        }
        assert_eq!(state.polls.load(Ordering::SeqCst), 3);

        shutdown.store(true, Ordering::SeqCst);
        ch.wake_worker();
        worker.join().unwrap();
    }

    #[test]
    fn ready_flag_mode_reports_hits_for_failed_polls() {
        let (driver, state) = ScriptedDriver::new(SensorKind::Force);
        let ch = DeviceChannel::new(driver, MissSignal::ReadyFlag);
        ch.try_connect().unwrap();
        state.fail_polls_through.store(u32::MAX, Ordering::SeqCst);

        let shutdown = Arc::new(AtomicBool::new(false));
        let worker = {
            let ch = ch.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || ch.run_worker(&shutdown))
        };

        ch.wait_until_idle();
        assert!(ch.request_poll(0.025));
        ch.wait_dispatched();
        ch.wait_until_idle();
        // The poll failed, but in ready-flag mode the slot is flagged anyway.
        assert_eq!(ch.reconcile(), Reconciled::Hit);

        shutdown.store(true, Ordering::SeqCst);
        ch.wake_worker();
        worker.join().unwrap();
    }

    #[test]
    fn reconnect_preserves_totals_and_zeroes_consecutive() {
        let (ch, state) = test_channel();

        fake_poll(&ch, 1.0, true);
        ch.reconcile();
        for _ in 0..5 {
            fake_poll(&ch, 0.0, false);
            ch.reconcile();
        }
        assert_eq!(ch.counters().consecutive_errors, 5);

        ch.reconnect().unwrap();
        let c = ch.counters();
        assert_eq!(c.consecutive_errors, 0);
        assert_eq!(c.total_errors, 5);
        assert_eq!(c.total_reads, 6);
        assert_eq!(state.connects.load(Ordering::SeqCst), 2);
        assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
    }
}

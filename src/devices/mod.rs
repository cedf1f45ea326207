//! Device drivers for the rig's sensors.
//!
//! Each sensor type implements [`DeviceDriver`]: connect, poll into a
//! caller-provided reading buffer, disconnect. The byte-level transports
//! (serial, I2C, USB) live behind this trait; the drivers here synthesize
//! readings so the acquisition loop can run on any machine.
//!
//! Poll latency is unbounded from the caller's point of view. A driver whose
//! natural scan takes as long as the acquisition cycle (the EMG band batches
//! 25 sub-reads per cycle) reports that through `nominal_poll_duration`, and
//! the coordinator skips its end-of-cycle wait while such a sensor is
//! connected.

pub mod emg;
pub mod force;
pub mod glove;
pub mod imu;

use std::fmt;
use std::time::Duration;

use crate::error::DeviceError;

pub use emg::EmgDriver;
pub use force::ForceDriver;
pub use glove::{GloveDriver, GloveVariant};
pub use imu::ImuDriver;

/// The rig's sensor complement, in declared record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Imu,
    Glove,
    Force,
    Emg,
}

/// Record layout order. Every record renders all four slots, connected or not.
pub const DECLARED_ORDER: [SensorKind; 4] =
    [SensorKind::Imu, SensorKind::Glove, SensorKind::Force, SensorKind::Emg];

impl SensorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Imu => "IMU",
            SensorKind::Glove => "Glove",
            SensorKind::Force => "Force",
            SensorKind::Emg => "EMG",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque per-device connection identifier handed out by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(pub i32);

/// A fixed-width sensor reading that can be rendered into a record segment.
///
/// `byte_len` must be constant for the lifetime of a channel; the record
/// format relies on it for positional decoding.
pub trait Sample: Clone + Send + 'static {
    fn byte_len(&self) -> usize;
    fn write_bytes(&self, out: &mut Vec<u8>);
    /// Reset to the zero reading (what an unused channel slot renders as).
    fn clear(&mut self);
}

/// Capability set every sensor transport provides.
pub trait DeviceDriver: Send + 'static {
    type Reading: Sample;

    fn kind(&self) -> SensorKind;

    /// A zeroed reading of this device's width. Width can depend on the
    /// device configuration (wired vs wireless glove), so it comes from the
    /// driver, not the type.
    fn blank_reading(&self) -> Self::Reading;

    fn connect(&mut self) -> Result<Handle, DeviceError>;

    /// One acquisition into `out`. `cycle_time` is the session elapsed time
    /// the reading will be attributed to.
    fn poll(
        &mut self,
        handle: Handle,
        cycle_time: f64,
        out: &mut Self::Reading,
    ) -> Result<(), DeviceError>;

    fn disconnect(&mut self, handle: Handle);

    /// Duration of one natural scan of this device. Used by the coordinator
    /// to decide whether the cycle wait is redundant.
    fn nominal_poll_duration(&self) -> Duration;
}

/// Writes a float slice little-endian, the record byte order.
pub(crate) fn write_f32_slice(vals: &[f32], out: &mut Vec<u8>) {
    for v in vals {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
pub mod testutil {
    //! Scripted driver for exercising miss/reconnect paths deterministically.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::{DeviceDriver, Handle, Sample, SensorKind};
    use crate::error::DeviceError;

    #[derive(Debug, Clone, PartialEq)]
    pub struct TestReading(pub [f32; 2]);

    impl Sample for TestReading {
        fn byte_len(&self) -> usize {
            8
        }
        fn write_bytes(&self, out: &mut Vec<u8>) {
            super::write_f32_slice(&self.0, out);
        }
        fn clear(&mut self) {
            self.0 = [0.0; 2];
        }
    }

    /// Shared knobs and counters; tests keep a clone of the Arc to steer the
    /// driver and observe it after the session ends.
    #[derive(Default)]
    pub struct ScriptedState {
        /// Polls numbered from 1 fail while `poll <= fail_polls_through`.
        pub fail_polls_through: AtomicU32,
        /// Connect attempts numbered from 1 fail while
        /// `attempt <= fail_connects_through` (u32::MAX: always fail).
        pub fail_connects_through: AtomicU32,
        pub connects: AtomicU32,
        pub disconnects: AtomicU32,
        pub polls: AtomicU32,
    }

    pub struct ScriptedDriver {
        kind: SensorKind,
        nominal: Duration,
        pub state: Arc<ScriptedState>,
    }

    impl ScriptedDriver {
        pub fn new(kind: SensorKind) -> (Self, Arc<ScriptedState>) {
            let state = Arc::new(ScriptedState::default());
            (
                Self {
                    kind,
                    nominal: Duration::from_micros(50),
                    state: state.clone(),
                },
                state,
            )
        }

        pub fn with_nominal(mut self, nominal: Duration) -> Self {
            self.nominal = nominal;
            self
        }
    }

    impl DeviceDriver for ScriptedDriver {
        type Reading = TestReading;

        fn kind(&self) -> SensorKind {
            self.kind
        }

        fn blank_reading(&self) -> TestReading {
            TestReading([0.0; 2])
        }

        fn connect(&mut self) -> Result<Handle, DeviceError> {
            let attempt = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.state.fail_connects_through.load(Ordering::SeqCst) {
                return Err(DeviceError::NoResponse);
            }
            Ok(Handle(attempt as i32))
        }

        fn poll(
            &mut self,
            _handle: Handle,
            _cycle_time: f64,
            out: &mut TestReading,
        ) -> Result<(), DeviceError> {
            let n = self.state.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.state.fail_polls_through.load(Ordering::SeqCst) {
                return Err(DeviceError::Timeout);
            }
            // Encode the poll number so tests can tell readings apart.
            out.0 = [n as f32, n as f32 * 0.5];
            Ok(())
        }

        fn disconnect(&mut self, _handle: Handle) {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn nominal_poll_duration(&self) -> Duration {
            self.nominal
        }
    }
}

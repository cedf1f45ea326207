//! IMU chain driver.
//!
//! Four body-mounted inertial nodes daisy-chained over one serial link, each
//! contributing yaw/pitch/roll, for 12 float channels per scan. The transport
//! here synthesizes slow arm motion plus sensor noise; the wire protocol
//! (request byte, frame, stop byte) stays behind the trait.

use std::thread;
use std::time::Duration;

use rand::random_range;

use super::{DeviceDriver, Handle, Sample, SensorKind, write_f32_slice};
use crate::error::DeviceError;

pub const IMU_READ_LEN: usize = 12;

/// One serial transaction on the chain, end to end.
const SCAN_TIME: Duration = Duration::from_millis(3);

/// Degrees of noise on top of the synthesized joint angles.
const ANGLE_NOISE: f32 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub struct ImuReading(pub [f32; IMU_READ_LEN]);

impl Sample for ImuReading {
    fn byte_len(&self) -> usize {
        IMU_READ_LEN * 4
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        write_f32_slice(&self.0, out);
    }

    fn clear(&mut self) {
        self.0 = [0.0; IMU_READ_LEN];
    }
}

pub struct ImuDriver {
    connected: Option<Handle>,
    next_handle: i32,
    /// Probability that a poll gets no frame back (serial hiccup).
    drop_rate: f64,
}

impl ImuDriver {
    pub fn new(drop_rate: f64) -> Self {
        Self {
            connected: None,
            next_handle: 1,
            drop_rate,
        }
    }
}

impl DeviceDriver for ImuDriver {
    type Reading = ImuReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Imu
    }

    fn blank_reading(&self) -> ImuReading {
        ImuReading([0.0; IMU_READ_LEN])
    }

    fn connect(&mut self) -> Result<Handle, DeviceError> {
        let handle = Handle(self.next_handle);
        self.next_handle += 1;
        self.connected = Some(handle);
        Ok(handle)
    }

    fn poll(
        &mut self,
        handle: Handle,
        cycle_time: f64,
        out: &mut ImuReading,
    ) -> Result<(), DeviceError> {
        if self.connected != Some(handle) {
            return Err(DeviceError::NotConnected);
        }

        thread::sleep(SCAN_TIME);

        if random_range(0.0..1.0) < self.drop_rate {
            return Err(DeviceError::NoResponse);
        }

        // Slow reaching motion: each node sweeps at its own rate and phase.
        for (i, v) in out.0.iter_mut().enumerate() {
            let node = (i / 3) as f64;
            let axis = (i % 3) as f64;
            let sweep = (cycle_time * (0.4 + 0.1 * node) + axis).sin() * 45.0;
            *v = sweep as f32 + random_range(-ANGLE_NOISE..ANGLE_NOISE);
        }
        Ok(())
    }

    fn disconnect(&mut self, _handle: Handle) {
        self.connected = None;
    }

    fn nominal_poll_duration(&self) -> Duration {
        SCAN_TIME
    }
}

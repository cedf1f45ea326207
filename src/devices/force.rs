//! Force sensor driver.
//!
//! Four resistive pads on the palm and fingertips, read over I2C as one
//! four-channel frame.

use std::thread;
use std::time::Duration;

use rand::random_range;

use super::{DeviceDriver, Handle, Sample, SensorKind, write_f32_slice};
use crate::error::DeviceError;

pub const FORCE_READ_LEN: usize = 4;

const SCAN_TIME: Duration = Duration::from_millis(2);

/// Contact force baseline per pad, newtons.
const PAD_BASE: [f32; FORCE_READ_LEN] = [2.0, 1.2, 1.0, 0.8];

#[derive(Debug, Clone, PartialEq)]
pub struct ForceReading(pub [f32; FORCE_READ_LEN]);

impl Sample for ForceReading {
    fn byte_len(&self) -> usize {
        FORCE_READ_LEN * 4
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        write_f32_slice(&self.0, out);
    }

    fn clear(&mut self) {
        self.0 = [0.0; FORCE_READ_LEN];
    }
}

pub struct ForceDriver {
    connected: Option<Handle>,
    next_handle: i32,
    drop_rate: f64,
}

impl ForceDriver {
    pub fn new(drop_rate: f64) -> Self {
        Self {
            connected: None,
            next_handle: 1,
            drop_rate,
        }
    }
}

impl DeviceDriver for ForceDriver {
    type Reading = ForceReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Force
    }

    fn blank_reading(&self) -> ForceReading {
        ForceReading([0.0; FORCE_READ_LEN])
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
        out: &mut ForceReading,
    ) -> Result<(), DeviceError> {
        if self.connected != Some(handle) {
            return Err(DeviceError::NotConnected);
        }

        thread::sleep(SCAN_TIME);

        if random_range(0.0..1.0) < self.drop_rate {
            return Err(DeviceError::NoResponse);
        }

        // Grip pressure tracks the same curl rhythm as the glove.
        let squeeze = ((cycle_time * 0.8).sin() * 0.5 + 0.5) as f32;
        for (i, v) in out.0.iter_mut().enumerate() {
            *v = PAD_BASE[i] + squeeze * 6.0 + random_range(-0.05..0.05);
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

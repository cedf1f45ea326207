//! EMG band driver.
//!
//! Eight surface electrodes sampled at 1kHz by an external ADC. One "poll"
//! is a batched scan of 25 sub-reads, so a single poll takes as long as the
//! whole 25ms acquisition cycle. The coordinator keys its skip-cycle-wait
//! rule off this device's nominal poll duration.

use std::thread;
use std::time::Duration;

use rand::random_range;

use super::{DeviceDriver, Handle, Sample, SensorKind, write_f32_slice};
use crate::error::DeviceError;

pub const EMG_CHANNELS: usize = 8;
pub const EMG_READS_PER_CYCLE: usize = 25;
pub const EMG_READ_LEN: usize = EMG_CHANNELS * EMG_READS_PER_CYCLE;

/// Gap between sub-reads; 25 of them make the scan span the cycle.
const SUB_READ_TIME: Duration = Duration::from_micros(950);

#[derive(Debug, Clone, PartialEq)]
pub struct EmgReading(pub [f32; EMG_READ_LEN]);

impl Sample for EmgReading {
    fn byte_len(&self) -> usize {
        EMG_READ_LEN * 4
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        write_f32_slice(&self.0, out);
    }

    fn clear(&mut self) {
        self.0 = [0.0; EMG_READ_LEN];
    }
}

pub struct EmgDriver {
    connected: Option<Handle>,
    next_handle: i32,
    drop_rate: f64,
}

impl EmgDriver {
    pub fn new(drop_rate: f64) -> Self {
        Self {
            connected: None,
            next_handle: 1,
            drop_rate,
        }
    }
}

impl DeviceDriver for EmgDriver {
    type Reading = EmgReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Emg
    }

    fn blank_reading(&self) -> EmgReading {
        EmgReading([0.0; EMG_READ_LEN])
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
        out: &mut EmgReading,
    ) -> Result<(), DeviceError> {
        if self.connected != Some(handle) {
            return Err(DeviceError::NotConnected);
        }

        // Muscle activation envelope modulating millivolt-scale noise.
        let envelope = ((cycle_time * 0.8).sin() * 0.5 + 0.5) as f32;
        for sub in 0..EMG_READS_PER_CYCLE {
            thread::sleep(SUB_READ_TIME);
            if random_range(0.0..1.0) < self.drop_rate {
                // A dropped sub-read spoils the whole batch.
                return Err(DeviceError::Timeout);
            }
            for ch in 0..EMG_CHANNELS {
                let gain = 0.5 + 0.12 * ch as f32;
                out.0[sub * EMG_CHANNELS + ch] =
                    envelope * gain * random_range(-1.0..1.0f32);
            }
        }
        Ok(())
    }

    fn disconnect(&mut self, _handle: Handle) {
        self.connected = None;
    }

    fn nominal_poll_duration(&self) -> Duration {
        SUB_READ_TIME * EMG_READS_PER_CYCLE as u32
    }
}

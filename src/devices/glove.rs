//! Data glove driver.
//!
//! The wired glove reports 24 joint flex values per frame, the wireless one
//! 20; both are single bytes per joint. The variant is fixed at connect time
//! and decides the record segment width for the whole session.

use std::thread;
use std::time::Duration;

use rand::random_range;

use super::{DeviceDriver, Handle, Sample, SensorKind};
use crate::error::DeviceError;

pub const WIRED_GLOVE_READ_LEN: usize = 24;
pub const WIRELESS_GLOVE_READ_LEN: usize = 20;

const SCAN_TIME: Duration = Duration::from_millis(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GloveVariant {
    Wired,
    Wireless,
}

impl GloveVariant {
    pub fn read_len(&self) -> usize {
        match self {
            GloveVariant::Wired => WIRED_GLOVE_READ_LEN,
            GloveVariant::Wireless => WIRELESS_GLOVE_READ_LEN,
        }
    }
}

/// Backing store is sized for the wired variant; `len` is the active width.
#[derive(Debug, Clone, PartialEq)]
pub struct GloveReading {
    raw: [u8; WIRED_GLOVE_READ_LEN],
    len: usize,
}

impl GloveReading {
    pub fn zeroed(variant: GloveVariant) -> Self {
        Self {
            raw: [0; WIRED_GLOVE_READ_LEN],
            len: variant.read_len(),
        }
    }

    pub fn joints(&self) -> &[u8] {
        &self.raw[..self.len]
    }

    pub fn joints_mut(&mut self) -> &mut [u8] {
        &mut self.raw[..self.len]
    }
}

impl Sample for GloveReading {
    fn byte_len(&self) -> usize {
        self.len
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.joints());
    }

    fn clear(&mut self) {
        self.raw = [0; WIRED_GLOVE_READ_LEN];
    }
}

pub struct GloveDriver {
    variant: GloveVariant,
    connected: Option<Handle>,
    next_handle: i32,
    drop_rate: f64,
}

impl GloveDriver {
    pub fn new(variant: GloveVariant, drop_rate: f64) -> Self {
        Self {
            variant,
            connected: None,
            next_handle: 1,
            drop_rate,
        }
    }
}

impl DeviceDriver for GloveDriver {
    type Reading = GloveReading;

    fn kind(&self) -> SensorKind {
        SensorKind::Glove
    }

    fn blank_reading(&self) -> GloveReading {
        GloveReading::zeroed(self.variant)
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
        out: &mut GloveReading,
    ) -> Result<(), DeviceError> {
        if self.connected != Some(handle) {
            return Err(DeviceError::NotConnected);
        }

        thread::sleep(SCAN_TIME);

        if random_range(0.0..1.0) < self.drop_rate {
            return Err(DeviceError::NoResponse);
        }

        // Fingers curl and release together around mid-range flex.
        let grip = ((cycle_time * 0.8).sin() * 0.5 + 0.5) * 160.0;
        for (i, joint) in out.joints_mut().iter_mut().enumerate() {
            let offset = (i % 4) as f64 * 8.0;
            let val = 40.0 + grip + offset + random_range(-3.0..3.0);
            *joint = val.clamp(0.0, 255.0) as u8;
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

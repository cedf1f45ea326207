//! Status indicators.
//!
//! The rig carries two lamps: ok (green) and error (red). They signal
//! initialization progress per sensor, steady-state hit/miss while
//! recording, and the end-of-session percent-missed blink count. GPIO stays
//! behind the trait; the default backend logs transitions instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    Ok,
    Error,
}

pub trait Lamps: Send + Sync {
    fn set(&self, lamp: Lamp, on: bool);

    fn set_ok(&self, on: bool) {
        self.set(Lamp::Ok, on);
    }

    fn set_error(&self, on: bool) {
        self.set(Lamp::Error, on);
    }
}

/// Blink one lamp; on/off dwell times are equal.
pub fn blink(lamps: &dyn Lamps, lamp: Lamp, times: u32, dwell: Duration) {
    for _ in 0..times {
        lamps.set(lamp, true);
        thread::sleep(dwell);
        lamps.set(lamp, false);
        thread::sleep(dwell);
    }
}

/// Blink both lamps together once (init-cycle and session-summary framing).
pub fn blink_both(lamps: &dyn Lamps, dwell: Duration) {
    lamps.set_ok(true);
    lamps.set_error(true);
    thread::sleep(dwell);
    lamps.set_ok(false);
    lamps.set_error(false);
    thread::sleep(dwell);
}

/// Log-backed lamps. Only transitions are logged so the steady recording
/// state does not flood the output at 40Hz.
#[derive(Default)]
pub struct LogLamps {
    ok: AtomicBool,
    error: AtomicBool,
}

impl Lamps for LogLamps {
    fn set(&self, lamp: Lamp, on: bool) {
        let cell = match lamp {
            Lamp::Ok => &self.ok,
            Lamp::Error => &self.error,
        };
        if cell.swap(on, Ordering::Relaxed) != on {
            let name = match lamp {
                Lamp::Ok => "OK",
                Lamp::Error => "ERROR",
            };
            info!("[lamp] {} {}", name, if on { "on" } else { "off" });
        }
    }
}

/// Lamps that go nowhere, for tests and headless embedding.
pub struct NullLamps;

impl Lamps for NullLamps {
    fn set(&self, _lamp: Lamp, _on: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLamps {
        events: Mutex<Vec<(Lamp, bool)>>,
    }

    impl Lamps for RecordingLamps {
        fn set(&self, lamp: Lamp, on: bool) {
            self.events.lock().unwrap().push((lamp, on));
        }
    }

    #[test]
    fn blink_pulses_the_requested_lamp() {
        let lamps = RecordingLamps::default();
        blink(&lamps, Lamp::Error, 2, Duration::from_millis(1));
        let events = lamps.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                (Lamp::Error, true),
                (Lamp::Error, false),
                (Lamp::Error, true),
                (Lamp::Error, false),
            ]
        );
    }
}

//! Reconnection policy.
//!
//! One bounded-retry implementation shared by every device type; the
//! per-sensor reattach logic is whatever the channel's driver does in
//! `connect`. Four attempts four seconds apart matches the deployed rig.

use std::thread;
use std::time::Duration;

use log::warn;

use super::channel::SensorChannel;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Reattach a channel, retrying up to `max_attempts` times with
    /// `backoff` between attempts. Blocks the caller for up to
    /// `max_attempts * backoff`; the coordinator accepts that overrun while
    /// recovering. Cumulative counters survive, `consecutive_errors` is
    /// zeroed by a successful reconnect.
    pub fn start_with_retries(&self, channel: &dyn SensorChannel) -> Result<(), DeviceError> {
        let mut last = DeviceError::NotConnected;
        for attempt in 1..=self.max_attempts {
            match channel.reconnect() {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "[{}] reconnect attempt {}/{} failed: {}",
                        channel.kind(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last = e;
                    if attempt < self.max_attempts {
                        thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::channel::DeviceChannel;
    use crate::config::MissSignal;
    use crate::devices::SensorKind;
    use crate::devices::testutil::ScriptedDriver;
    use std::sync::atomic::Ordering;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::ZERO)
    }

    #[test]
    fn gives_up_after_the_last_attempt() {
        let (driver, state) = ScriptedDriver::new(SensorKind::Glove);
        let channel = DeviceChannel::new(driver, MissSignal::ReturnCode);
        state.fail_connects_through.store(u32::MAX, Ordering::SeqCst);

        assert!(policy().start_with_retries(&*channel).is_err());
        assert_eq!(state.connects.load(Ordering::SeqCst), 4);
        assert!(!channel.is_connected());
    }

    #[test]
    fn stops_retrying_once_connected() {
        let (driver, state) = ScriptedDriver::new(SensorKind::Glove);
        let channel = DeviceChannel::new(driver, MissSignal::ReturnCode);
        // First two attempts fail, third succeeds.
        state.fail_connects_through.store(2, Ordering::SeqCst);

        assert!(policy().start_with_retries(&*channel).is_ok());
        assert_eq!(state.connects.load(Ordering::SeqCst), 3);
        assert!(channel.is_connected());
    }
}

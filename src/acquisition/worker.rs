//! Device worker threads.
//!
//! One real OS thread per connected sensor. The poll deadline is the binding
//! constraint of the whole loop, so workers run at the highest priority the
//! platform grants; the coordinator and recorder stay at normal priority.
//! Failing to create the thread is fatal (there is no degraded mode without
//! a polling thread), failing to elevate it is only logged.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread::JoinHandle;

use log::warn;
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use super::channel::{DeviceChannel, SensorChannel};
use crate::devices::DeviceDriver;
use crate::error::SessionError;

pub fn spawn_worker<D: DeviceDriver>(
    channel: Arc<DeviceChannel<D>>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, SessionError> {
    let name = channel.kind().name();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                warn!("[{}] running at default priority: {:?}", name, e);
            }
            channel.run_worker(&shutdown);
        })
        .map_err(|source| SessionError::ThreadSpawn { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::channel::{Reconciled, SensorChannel};
    use crate::config::MissSignal;
    use crate::devices::SensorKind;
    use crate::devices::testutil::ScriptedDriver;
    use std::sync::atomic::Ordering;

    #[test]
    fn spawned_worker_polls_on_request() {
        let (driver, state) = ScriptedDriver::new(SensorKind::Imu);
        let channel = DeviceChannel::new(driver, MissSignal::ReturnCode);
        channel.try_connect().unwrap();

        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_worker(channel.clone(), shutdown.clone()).unwrap();

        channel.wait_until_idle();
        assert!(channel.request_poll(0.025));
        channel.wait_until_idle();
        assert_eq!(channel.reconcile(), Reconciled::Hit);
        assert_eq!(state.polls.load(Ordering::SeqCst), 1);

        shutdown.store(true, Ordering::SeqCst);
        channel.wake_worker();
        handle.join().unwrap();
    }
}

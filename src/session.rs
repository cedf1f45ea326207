//! Session lifecycle.
//!
//! A `Session` owns every per-run resource: the channel list in declared
//! record order, the worker and recorder threads, the cycle coordinator,
//! the shutdown flag and the counters. Nothing lives in module state;
//! coordinator, recorder and workers all borrow from here.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use log::info;

use crate::acquisition::channel::{ChannelCounters, DeviceChannel, SensorChannel};
use crate::acquisition::coordinator::Coordinator;
use crate::acquisition::worker::spawn_worker;
use crate::config::Config;
use crate::devices::{
    DeviceDriver, EmgDriver, ForceDriver, GloveDriver, ImuDriver, SensorKind,
};
use crate::error::SessionError;
use crate::metrics::{CycleTrail, SessionStats, Stats, duration_stats};
use crate::recording::recorder::Recorder;
use crate::status::Lamps;
use crate::trigger::Trigger;

/// Simulated transport hiccup probability for the synthesized drivers.
const DRIVER_DROP_RATE: f64 = 0.001;

type WorkerSpawner =
    Box<dyn FnOnce(Arc<AtomicBool>) -> Result<JoinHandle<()>, SessionError> + Send>;

/// One declared channel slot plus the deferred worker spawn for it. The
/// spawner keeps the typed `Arc` the worker thread needs; everything else
/// sees the channel through the trait object.
pub struct ChannelSetup {
    pub channel: Arc<dyn SensorChannel>,
    /// Disabled-in-config sensors still occupy their record slot; they are
    /// just never connected.
    pub enabled: bool,
    spawner: WorkerSpawner,
}

impl ChannelSetup {
    pub fn new<D: DeviceDriver>(driver: D, config: &Config, enabled: bool) -> Self {
        let typed = DeviceChannel::new(driver, config.miss_signal);
        let channel: Arc<dyn SensorChannel> = typed.clone();
        let spawner: WorkerSpawner = Box::new(move |shutdown| spawn_worker(typed, shutdown));
        Self {
            channel,
            enabled,
            spawner,
        }
    }
}

/// The rig's full channel complement in declared order, built from config.
pub fn rig_setups(config: &Config) -> Vec<ChannelSetup> {
    let s = &config.sensors;
    vec![
        ChannelSetup::new(ImuDriver::new(DRIVER_DROP_RATE), config, s.imu),
        ChannelSetup::new(
            GloveDriver::new(s.glove_mode.variant(), DRIVER_DROP_RATE),
            config,
            s.glove,
        ),
        ChannelSetup::new(ForceDriver::new(DRIVER_DROP_RATE), config, s.force),
        ChannelSetup::new(EmgDriver::new(DRIVER_DROP_RATE), config, s.emg),
    ]
}

pub struct Session {
    channels: Arc<Vec<Arc<dyn SensorChannel>>>,
    workers: Vec<JoinHandle<()>>,
    recorder: Recorder,
    coordinator: Coordinator,
    stats: Arc<SessionStats>,
    trail: Arc<CycleTrail>,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    /// Open the log, spawn the recorder and one worker per connected
    /// channel, and stand up the coordinator. Any failure here is fatal.
    pub fn start(
        config: &Config,
        setups: Vec<ChannelSetup>,
        lamps: Arc<dyn Lamps>,
    ) -> Result<Self, SessionError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SessionStats::default());
        let trail = Arc::new(CycleTrail::new());

        let channels: Arc<Vec<Arc<dyn SensorChannel>>> =
            Arc::new(setups.iter().map(|s| s.channel.clone()).collect());

        let recorder = Recorder::spawn(
            channels.clone(),
            stats.clone(),
            lamps.clone(),
            config.output_path.clone(),
            config.rotate_interval_secs,
            shutdown.clone(),
        )?;

        let mut workers = Vec::new();
        for setup in setups {
            if setup.channel.is_connected() {
                workers.push((setup.spawner)(shutdown.clone())?);
            }
        }
        // First request must not race worker startup; wait for every worker
        // to park before the coordinator issues anything.
        for channel in channels.iter() {
            if channel.is_connected() {
                channel.wait_until_idle();
            }
        }

        let coordinator = Coordinator::new(
            channels.clone(),
            stats.clone(),
            trail.clone(),
            lamps,
            config,
            shutdown.clone(),
        )?;

        info!(
            "[Session] started with {}/{} sensors connected",
            channels.iter().filter(|c| c.is_connected()).count(),
            channels.len()
        );

        Ok(Self {
            channels,
            workers,
            recorder,
            coordinator,
            stats,
            trail,
            shutdown,
        })
    }

    /// Run the acquisition loop until the trigger drops (or a sensor loss
    /// is fatal under the configured policy).
    pub fn run(&mut self, trigger: &dyn Trigger) -> Result<(), SessionError> {
        self.coordinator.run(trigger, &self.recorder)
    }

    /// Tear everything down and produce the summary: raise the shutdown
    /// flag, wake and join all threads, close the log and the devices.
    pub fn finish(mut self) -> SessionSummary {
        self.shutdown.store(true, Ordering::SeqCst);
        for channel in self.channels.iter() {
            channel.wake_worker();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.recorder.stop();
        self.coordinator.join_ticker();

        for channel in self.channels.iter() {
            channel.disconnect();
        }

        let samples = self.trail.drain();
        let channels = self
            .channels
            .iter()
            .map(|c| ChannelSummary {
                kind: c.kind(),
                used: c.counters().total_reads > 0,
                disabled: c.is_disabled(),
                counters: c.counters(),
            })
            .collect();

        SessionSummary {
            elapsed_secs: self.stats.elapsed(),
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            miss_cycles: self.stats.miss_cycles.load(Ordering::Relaxed),
            percent_missed: self.stats.percent_missed(),
            overruns: self.stats.overruns.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
            cycle_stats: duration_stats(&samples),
            channels,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub kind: SensorKind,
    pub used: bool,
    pub disabled: bool,
    pub counters: ChannelCounters,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub elapsed_secs: f64,
    pub cycles: u64,
    pub miss_cycles: u64,
    pub percent_missed: f64,
    pub overruns: u64,
    pub reconnects: u64,
    pub cycle_stats: Option<Stats>,
    pub channels: Vec<ChannelSummary>,
}

impl SessionSummary {
    pub fn log(&self) {
        info!(
            "[Session] elapsed {:.3}s, {} cycles, {} with misses ({:.3}% missed), {} overruns, {} reconnects",
            self.elapsed_secs,
            self.cycles,
            self.miss_cycles,
            self.percent_missed,
            self.overruns,
            self.reconnects
        );
        if let Some(s) = &self.cycle_stats {
            info!(
                "[Session] cycle work: min {:.0}us, max {:.0}us, mean {:.0}us over {} samples",
                s.min, s.max, s.mean, s.count
            );
        }
        for ch in &self.channels {
            if ch.used {
                info!(
                    "[{}] {} reads, {} errors{}",
                    ch.kind,
                    ch.counters.total_reads,
                    ch.counters.total_errors,
                    if ch.disabled { " (disabled mid-session)" } else { "" }
                );
            } else {
                info!("[{}] unused", ch.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testutil::ScriptedDriver;
    use crate::recording::record::{HIT, read_records};
    use crate::status::NullLamps;
    use crate::trigger::TimedTrigger;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn full_lifecycle_records_until_the_trigger_drops() {
        let dir = tempdir().unwrap();
        let config = Config {
            cycle_period_ms: 5,
            output_path: dir.path().join("session.bin"),
            ..Config::default()
        };

        let setups: Vec<ChannelSetup> = [SensorKind::Imu, SensorKind::Force]
            .into_iter()
            .map(|kind| {
                let (driver, _) = ScriptedDriver::new(kind);
                ChannelSetup::new(driver, &config, true)
            })
            .collect();
        for setup in &setups {
            setup.channel.try_connect().unwrap();
        }

        let mut session = Session::start(&config, setups, Arc::new(NullLamps)).unwrap();
        let trigger = TimedTrigger::arm(Duration::from_millis(80));
        session.run(&trigger).unwrap();
        let summary = session.finish();

        assert!(summary.cycles >= 2, "only {} cycles ran", summary.cycles);
        assert_eq!(summary.miss_cycles, 0);
        assert_eq!(summary.percent_missed, 0.0);
        assert!(summary.elapsed_secs > 0.0);

        let bytes = std::fs::read(dir.path().join("session.bin")).unwrap();
        let records = read_records(&bytes, &[8, 8]).unwrap();
        assert_eq!(records.len() as u64, summary.cycles);
        assert!(records.iter().all(|r| r.overall == HIT));
        // Timestamps advance monotonically.
        for pair in records.windows(2) {
            assert!(pair[1].time >= pair[0].time);
        }
    }
}

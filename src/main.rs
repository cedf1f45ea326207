//! ArmTrack entry point.
//!
//! Procedure, mirroring the rig:
//! 1. Initialization passes: both lamps blink to frame each pass, then one
//!    blink per sensor (ok lamp if it connected, error lamp if not). A
//!    sensor that never connects is carried as unused, not fatal.
//! 2. The trigger arms and the coordinator records one 25ms cycle at a
//!    time: ok lamp steady on clean cycles, error lamp on misses.
//! 3. When the trigger drops: flush, disconnect, then the summary blink
//!    code: both lamps once, the error lamp once per percent of missed
//!    cycles, both lamps once again. A summary CSV lands next to the log.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use armtrack::config::Config;
use armtrack::recording::export::write_summary_csv;
use armtrack::session::{ChannelSetup, Session, rig_setups};
use armtrack::status::{Lamp, Lamps, LogLamps, blink, blink_both};
use armtrack::trigger::TimedTrigger;

const INIT_BLINK: Duration = Duration::from_millis(500);
const SUMMARY_FRAME_BLINK: Duration = Duration::from_secs(1);
const PERCENT_BLINK: Duration = Duration::from_millis(250);
const INIT_PASS_GAP: Duration = Duration::from_secs(2);

fn main() {
    env_logger::init();
    info!("=== ARMTRACK START ===");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("armtrack.toml"));
    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let lamps: Arc<dyn Lamps> = Arc::new(LogLamps::default());
    let setups = rig_setups(&config);
    initialize_sensors(&setups, &*lamps, config.init_attempts);

    if !setups.iter().any(|s| s.channel.is_connected()) {
        warn!("no sensors connected; recording unused slots only");
    }

    info!("collecting data for up to {}s", config.max_session_secs);
    let trigger = TimedTrigger::arm(Duration::from_secs(config.max_session_secs));

    let mut session = match Session::start(&config, setups, lamps.clone()) {
        Ok(s) => s,
        Err(e) => {
            error!("could not start session: {}", e);
            std::process::exit(1);
        }
    };

    let run_result = session.run(&trigger);
    let summary = session.finish();

    if let Err(e) = &run_result {
        error!("session ended early: {}", e);
    }
    summary.log();

    if let Err(e) = write_summary_csv(&config.summary_path, &summary) {
        error!("could not write summary: {}", e);
    }

    // Percent-missed blink code framing the end of the run.
    blink_both(&*lamps, SUMMARY_FRAME_BLINK);
    blink(
        &*lamps,
        Lamp::Error,
        summary.percent_missed.round() as u32,
        PERCENT_BLINK,
    );
    blink_both(&*lamps, SUMMARY_FRAME_BLINK);

    info!("=== SESSION ENDED ===");
    if run_result.is_err() {
        std::process::exit(1);
    }
}

/// Repeatedly try to bring up every enabled sensor, blinking the lamp
/// protocol as the rig does. Stops early once everything enabled is up.
fn initialize_sensors(setups: &[ChannelSetup], lamps: &dyn Lamps, passes: u32) {
    for pass in 1..=passes {
        blink_both(lamps, INIT_BLINK);
        for setup in setups {
            if !setup.enabled || setup.channel.is_connected() {
                continue;
            }
            match setup.channel.try_connect() {
                Ok(()) => {
                    info!("[{}] initialized", setup.channel.kind());
                    blink(lamps, Lamp::Ok, 1, INIT_BLINK);
                }
                Err(e) => {
                    warn!("[{}] could not initialize: {}", setup.channel.kind(), e);
                    blink(lamps, Lamp::Error, 1, INIT_BLINK);
                }
            }
        }

        let pending = setups
            .iter()
            .any(|s| s.enabled && !s.channel.is_connected());
        if !pending {
            return;
        }
        if pass < passes {
            thread::sleep(INIT_PASS_GAP);
        }
    }
}

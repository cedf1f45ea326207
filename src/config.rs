//! Session configuration.
//!
//! Everything with a policy choice lives here so the two historical behavior
//! variants (miss signalling, reconnect exhaustion) stay selectable instead
//! of being silently unified. Loaded from TOML; every field has a default
//! matching the rig's deployed settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::devices::GloveVariant;

/// How a worker translates a driver's poll result into the slot ready flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissSignal {
    /// A failed poll leaves the slot un-flagged; reconciliation treats the
    /// absence of fresh data as the miss.
    ReturnCode,
    /// The slot is flagged ready whether or not the poll succeeded; only a
    /// worker that never finished produces a miss. Legacy behavior.
    ReadyFlag,
}

/// What to do with a channel once reconnection retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Disable the channel and keep recording with the rest.
    Degrade,
    /// Treat the lost sensor as fatal and end the session.
    EndSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GloveMode {
    Wired,
    Wireless,
}

impl GloveMode {
    pub fn variant(&self) -> GloveVariant {
        match self {
            GloveMode::Wired => GloveVariant::Wired,
            GloveMode::Wireless => GloveVariant::Wireless,
        }
    }
}

/// Which sensors this session records. A sensor that is enabled but fails to
/// initialize is carried as "unused" rather than aborting the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sensors {
    pub imu: bool,
    pub glove: bool,
    pub glove_mode: GloveMode,
    pub force: bool,
    pub emg: bool,
}

impl Default for Sensors {
    fn default() -> Self {
        Self {
            imu: true,
            glove: true,
            glove_mode: GloveMode::Wireless,
            force: true,
            emg: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nominal acquisition cycle length in milliseconds.
    pub cycle_period_ms: u64,
    /// Consecutive misses a channel tolerates before reconnection kicks in.
    /// 20 at the 25ms cadence is half a second of lost data.
    pub consecutive_miss_limit: u32,
    pub reconnect_attempts: u32,
    pub reconnect_backoff_secs: u64,
    pub exhaustion_policy: ExhaustionPolicy,
    pub miss_signal: MissSignal,
    /// Session length for the timed trigger, seconds.
    pub max_session_secs: u64,
    /// Initialization passes before giving up on absent sensors.
    pub init_attempts: u32,
    pub output_path: PathBuf,
    /// Close and reopen the log every this many simulated seconds.
    pub rotate_interval_secs: u64,
    /// Where the end-of-session summary CSV goes.
    pub summary_path: PathBuf,
    pub sensors: Sensors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cycle_period_ms: 25,
            consecutive_miss_limit: 20,
            reconnect_attempts: 4,
            reconnect_backoff_secs: 4,
            exhaustion_policy: ExhaustionPolicy::Degrade,
            miss_signal: MissSignal::ReturnCode,
            max_session_secs: 60,
            init_attempts: 3,
            output_path: PathBuf::from("ArmTrackData.bin"),
            rotate_interval_secs: 60,
            summary_path: PathBuf::from("ArmTrackSummary.csv"),
            sensors: Sensors::default(),
        }
    }
}

impl Config {
    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| format!("bad config {}: {}", path.display(), e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(format!("cannot read {}: {}", path.display(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_rig() {
        let cfg = Config::default();
        assert_eq!(cfg.cycle_period_ms, 25);
        assert_eq!(cfg.consecutive_miss_limit, 20);
        assert_eq!(cfg.reconnect_attempts, 4);
        assert_eq!(cfg.reconnect_backoff_secs, 4);
        assert_eq!(cfg.exhaustion_policy, ExhaustionPolicy::Degrade);
        assert_eq!(cfg.miss_signal, MissSignal::ReturnCode);
        assert!(!cfg.sensors.emg);
    }

    #[test]
    fn parses_policy_switches() {
        let cfg: Config = toml::from_str(
            r#"
            cycle_period_ms = 10
            exhaustion_policy = "end-session"
            miss_signal = "ready-flag"

            [sensors]
            emg = true
            glove_mode = "wired"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cycle_period_ms, 10);
        assert_eq!(cfg.exhaustion_policy, ExhaustionPolicy::EndSession);
        assert_eq!(cfg.miss_signal, MissSignal::ReadyFlag);
        assert!(cfg.sensors.emg);
        assert_eq!(cfg.sensors.glove_mode, GloveMode::Wired);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.consecutive_miss_limit, 20);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load(Path::new("definitely/not/here.toml")).unwrap();
        assert_eq!(cfg.cycle_period_ms, Config::default().cycle_period_ms);
    }
}

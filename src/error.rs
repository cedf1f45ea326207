//! Error taxonomy.
//!
//! Two tiers, matching the containment policy: sensor-level failures
//! (`DeviceError`) never leave the channel/reconciliation boundary except as
//! a record marker or a reconnect attempt; resource-level failures
//! (`SessionError`) abort the session, since there is no degraded mode
//! without durable storage or a polling thread.

use thiserror::Error;

use crate::devices::SensorKind;

/// Failures a device driver can report. All of these are contained: a failed
/// poll becomes a missed read, a failed connect feeds the retry policy.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not connected")]
    NotConnected,

    #[error("no response from device")]
    NoResponse,

    #[error("poll timed out")]
    Timeout,

    #[error("malformed frame: {0}")]
    BadFrame(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fatal session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not open output log {path}: {source}")]
    OutputLog {
        path: String,
        source: std::io::Error,
    },

    #[error("could not spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// Reconnection exhausted under the end-session policy.
    #[error("{0} lost and reconnection exhausted")]
    SensorLost(SensorKind),
}

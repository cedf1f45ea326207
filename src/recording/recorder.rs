//! Recorder thread.
//!
//! Sole owner of the output log handle. Follows the same control-cell
//! protocol as the device workers: the coordinator busy-waits for READY,
//! then signals; reconciliation and the file write happen here, overlapped
//! with the coordinator's next steps. The handoff discipline (coordinator
//! never signals before the previous record is done) is what keeps
//! reconciliation inside one cycle period, which the slot alternation
//! depends on.
//!
//! Every 60 simulated seconds the log is closed and reopened in append mode,
//! a checkpoint against partial-write corruption if the rig loses power.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use log::{debug, error, info};

use crate::acquisition::channel::{ControlCell, Reconciled, SensorChannel};
use crate::error::SessionError;
use crate::metrics::SessionStats;
use crate::recording::record::{HIT, MISS, TERMINATOR, UNUSED};
use crate::status::Lamps;

pub struct Recorder {
    control: Arc<ControlCell>,
    handle: Option<JoinHandle<()>>,
}

struct RecorderCtx {
    channels: Arc<Vec<Arc<dyn SensorChannel>>>,
    stats: Arc<SessionStats>,
    lamps: Arc<dyn Lamps>,
    path: PathBuf,
    rotate_interval_secs: f64,
}

impl Recorder {
    /// Open the output log and start the recorder thread. Both failures are
    /// resource failures and therefore fatal.
    pub fn spawn(
        channels: Arc<Vec<Arc<dyn SensorChannel>>>,
        stats: Arc<SessionStats>,
        lamps: Arc<dyn Lamps>,
        path: PathBuf,
        rotate_interval_secs: u64,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, SessionError> {
        let file = File::create(&path).map_err(|source| SessionError::OutputLog {
            path: path.display().to_string(),
            source,
        })?;

        let control = Arc::new(ControlCell::new());
        let ctx = RecorderCtx {
            channels,
            stats,
            lamps,
            path,
            rotate_interval_secs: rotate_interval_secs as f64,
        };

        let thread_control = control.clone();
        let handle = std::thread::Builder::new()
            .name("Recorder".to_string())
            .spawn(move || run(ctx, file, thread_control, shutdown))
            .map_err(|source| SessionError::ThreadSpawn {
                name: "Recorder",
                source,
            })?;

        Ok(Self {
            control,
            handle: Some(handle),
        })
    }

    /// True when the previous record is written and the thread is parked.
    pub fn is_ready(&self) -> bool {
        self.control.is_ready()
    }

    /// Busy-spin until the previous record is done.
    pub fn wait_until_idle(&self) {
        self.control.wait_until_idle();
    }

    /// Kick off reconciliation and persistence for the current cycle.
    pub fn signal(&self) {
        self.control.request();
    }

    /// Wake the parked thread so it can observe shutdown, then join. The
    /// caller raises the session shutdown flag first.
    pub fn stop(&mut self) {
        self.control.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(ctx: RecorderCtx, file: File, control: Arc<ControlCell>, shutdown: Arc<AtomicBool>) {
    let mut writer = BufWriter::new(file);
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut last_rotate = 0.0f64;

    debug!("[Recorder] up, {} channel slots", ctx.channels.len());

    while control.announce_and_wait(&shutdown) {
        let elapsed = ctx.stats.elapsed();
        let any_miss = record_cycle(&ctx, elapsed, &mut buf);

        if let Err(e) = writer.write_all(&buf) {
            error!("[Recorder] write failed: {}", e);
        }

        ctx.stats.cycles.fetch_add(1, Ordering::Relaxed);
        if any_miss {
            ctx.stats.miss_cycles.fetch_add(1, Ordering::Relaxed);
            ctx.lamps.set_ok(false);
            ctx.lamps.set_error(true);
        } else {
            ctx.lamps.set_error(false);
            ctx.lamps.set_ok(true);
        }

        if elapsed - last_rotate >= ctx.rotate_interval_secs {
            last_rotate = elapsed;
            match rotate(&ctx.path, &mut writer) {
                Ok(()) => info!("[Recorder] log rotated at t={:.1}s", elapsed),
                Err(e) => error!("[Recorder] rotation failed: {}", e),
            }
        }
    }

    if let Err(e) = writer.flush() {
        error!("[Recorder] final flush failed: {}", e);
    }
    debug!("[Recorder] stopped");
}

/// Reconcile every channel slot in declared order and encode one record into
/// `buf`. Returns whether any connected channel missed.
fn record_cycle(ctx: &RecorderCtx, elapsed: f64, buf: &mut Vec<u8>) -> bool {
    let mut any_miss = false;

    buf.clear();
    buf.push(HIT); // patched below once the per-channel outcomes are known
    buf.extend_from_slice(&elapsed.to_le_bytes());

    for channel in ctx.channels.iter() {
        if channel.is_connected() {
            match channel.reconcile() {
                Reconciled::Hit => buf.push(HIT),
                Reconciled::Miss => {
                    any_miss = true;
                    buf.push(MISS);
                }
            }
            // On a miss this is the stale fallback from the last hit.
            channel.encode_last_good(buf);
        } else {
            buf.push(UNUSED);
            buf.resize(buf.len() + channel.segment_len(), 0);
        }
    }

    buf.push(TERMINATOR);
    if any_miss {
        buf[0] = MISS;
    }
    any_miss
}

/// Close and reopen the log in append mode.
fn rotate(path: &PathBuf, writer: &mut BufWriter<File>) -> std::io::Result<()> {
    writer.flush()?;
    let file = OpenOptions::new().append(true).open(path)?;
    *writer = BufWriter::new(file);
    Ok(())
}

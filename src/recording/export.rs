//! End-of-session summary export.
//!
//! One small CSV next to the binary log: `metric,value,description` rows
//! covering the session totals and per-channel counters. The binary log is
//! the data product; this file is for eyeballing a run without a decoder.

use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::session::SessionSummary;

#[derive(Serialize)]
struct SummaryRow<'a> {
    metric: String,
    value: String,
    description: &'a str,
}

fn row(metric: &str, value: String, description: &'static str) -> SummaryRow<'static> {
    SummaryRow {
        metric: metric.to_string(),
        value,
        description,
    }
}

pub fn write_summary_csv(path: &Path, summary: &SessionSummary) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_path(path)?;

    wtr.serialize(row(
        "elapsed_secs",
        format!("{:.3}", summary.elapsed_secs),
        "Session length in simulated seconds",
    ))?;
    wtr.serialize(row("cycles", summary.cycles.to_string(), "Records written"))?;
    wtr.serialize(row(
        "miss_cycles",
        summary.miss_cycles.to_string(),
        "Cycles containing at least one missed read",
    ))?;
    wtr.serialize(row(
        "percent_missed",
        format!("{:.3}", summary.percent_missed),
        "Miss cycles as a share of all cycles",
    ))?;
    wtr.serialize(row(
        "overruns",
        summary.overruns.to_string(),
        "Cycles that ran past their boundary",
    ))?;
    wtr.serialize(row(
        "reconnects",
        summary.reconnects.to_string(),
        "Sustained-failure reconnection escalations",
    ))?;

    if let Some(s) = &summary.cycle_stats {
        wtr.serialize(row("cycle_min_us", format!("{:.0}", s.min), "Fastest cycle work"))?;
        wtr.serialize(row("cycle_max_us", format!("{:.0}", s.max), "Slowest cycle work"))?;
        wtr.serialize(row("cycle_mean_us", format!("{:.0}", s.mean), "Mean cycle work"))?;
    }

    for ch in &summary.channels {
        let name = ch.kind.name().to_lowercase();
        let status = if ch.disabled {
            "disabled"
        } else if ch.used {
            "used"
        } else {
            "unused"
        };
        wtr.serialize(row(&format!("{}_status", name), status.to_string(), "Channel fate"))?;
        wtr.serialize(row(
            &format!("{}_reads", name),
            ch.counters.total_reads.to_string(),
            "Reconciliations for this channel",
        ))?;
        wtr.serialize(row(
            &format!("{}_errors", name),
            ch.counters.total_errors.to_string(),
            "Missed reads for this channel",
        ))?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::channel::ChannelCounters;
    use crate::devices::SensorKind;
    use crate::session::ChannelSummary;
    use tempfile::tempdir;

    #[test]
    fn summary_csv_lists_totals_and_channels() {
        let summary = SessionSummary {
            elapsed_secs: 12.5,
            cycles: 500,
            miss_cycles: 10,
            percent_missed: 2.0,
            overruns: 1,
            reconnects: 1,
            cycle_stats: None,
            channels: vec![ChannelSummary {
                kind: SensorKind::Imu,
                used: true,
                disabled: false,
                counters: ChannelCounters {
                    total_reads: 500,
                    total_errors: 10,
                    consecutive_errors: 0,
                },
            }],
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        write_summary_csv(&path, &summary).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("metric,value,description"));
        assert!(text.contains("cycles,500,"));
        assert!(text.contains("percent_missed,2.000,"));
        assert!(text.contains("imu_status,used,"));
        assert!(text.contains("imu_errors,10,"));
    }
}

//! Cycle record format.
//!
//! One fixed-width binary record per cycle, append-only:
//!
//! ```text
//! [1B  overall marker: '=' full hit | '*' any miss]
//! [8B  cycle elapsed time, f64 little-endian]
//! per declared channel, in fixed order:
//!   [1B marker: '=' hit | '*' miss | '-' unused]
//!   [N bytes reading, channel-specific width]
//! [1B  terminator '\n']
//! ```
//!
//! Channels that never connected (or were disabled mid-session) still occupy
//! their slot with the unused marker and a zero-filled reading, so record
//! length is constant for a given sensor configuration no matter which
//! subset actually initialized.

pub const HIT: u8 = b'=';
pub const MISS: u8 = b'*';
pub const UNUSED: u8 = b'-';
pub const TERMINATOR: u8 = b'\n';

/// One decoded cycle record: overall marker, timestamp, and per-channel
/// marker + raw segment bytes in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub overall: u8,
    pub time: f64,
    pub segments: Vec<(u8, Vec<u8>)>,
}

/// Total encoded size of one record for the given segment widths.
pub fn record_len(segment_lens: &[usize]) -> usize {
    1 + 8 + segment_lens.iter().map(|l| l + 1).sum::<usize>() + 1
}

/// Decode a stored log back into records. `segment_lens` must describe the
/// same sensor configuration the session recorded with; there is no layout
/// header in the stream.
pub fn read_records(data: &[u8], segment_lens: &[usize]) -> Result<Vec<DecodedRecord>, String> {
    let rec_len = record_len(segment_lens);
    if data.len() % rec_len != 0 {
        return Err(format!(
            "log length {} is not a multiple of the record length {}",
            data.len(),
            rec_len
        ));
    }

    let mut records = Vec::with_capacity(data.len() / rec_len);
    for (n, rec) in data.chunks_exact(rec_len).enumerate() {
        let overall = rec[0];
        if overall != HIT && overall != MISS {
            return Err(format!("record {}: bad overall marker 0x{:02x}", n, overall));
        }
        let time = f64::from_le_bytes(rec[1..9].try_into().unwrap_or_default());

        let mut segments = Vec::with_capacity(segment_lens.len());
        let mut at = 9;
        for &len in segment_lens {
            let marker = rec[at];
            if marker != HIT && marker != MISS && marker != UNUSED {
                return Err(format!("record {}: bad channel marker 0x{:02x}", n, marker));
            }
            segments.push((marker, rec[at + 1..at + 1 + len].to_vec()));
            at += 1 + len;
        }
        if rec[at] != TERMINATOR {
            return Err(format!("record {}: missing terminator", n));
        }
        records.push(DecodedRecord {
            overall,
            time,
            segments,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(overall: u8, time: f64, segments: &[(u8, &[u8])]) -> Vec<u8> {
        let mut buf = vec![overall];
        buf.extend_from_slice(&time.to_le_bytes());
        for (marker, bytes) in segments {
            buf.push(*marker);
            buf.extend_from_slice(bytes);
        }
        buf.push(TERMINATOR);
        buf
    }

    #[test]
    fn decodes_what_was_encoded() {
        let lens = [4, 2];
        let mut log = encode(HIT, 0.025, &[(HIT, &[1, 2, 3, 4]), (UNUSED, &[0, 0])]);
        log.extend(encode(MISS, 0.050, &[(MISS, &[1, 2, 3, 4]), (UNUSED, &[0, 0])]));

        let records = read_records(&log, &lens).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].overall, HIT);
        assert!((records[0].time - 0.025).abs() < 1e-12);
        assert_eq!(records[0].segments[0], (HIT, vec![1, 2, 3, 4]));
        assert_eq!(records[1].overall, MISS);
        assert_eq!(records[1].segments[0].0, MISS);
    }

    #[test]
    fn record_length_is_configuration_constant() {
        // 12-float IMU, 20-byte glove, 4-float force, unused EMG slot: the
        // wire width never depends on which subset connected.
        let lens = [48usize, 20, 16, 800];
        assert_eq!(record_len(&lens), 1 + 8 + (48 + 1) + (20 + 1) + (16 + 1) + (800 + 1) + 1);
    }

    #[test]
    fn rejects_truncated_logs() {
        let lens = [4usize];
        let log = encode(HIT, 0.0, &[(HIT, &[9, 9, 9, 9])]);
        assert!(read_records(&log[..log.len() - 1], &lens).is_err());
    }

    #[test]
    fn rejects_unknown_markers() {
        let lens = [1usize];
        let log = encode(b'?', 0.0, &[(HIT, &[0])]);
        assert!(read_records(&log, &lens).is_err());
    }
}

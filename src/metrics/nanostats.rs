//! Nanopore header-field parser and time-range aggregator (spec.md §4.7).
//!
//! FASTQ headers carry `key=value` fields after the first space; BAM
//! records have `channel`/`start_time` already extracted into
//! `RecordMeta` by the BAM tag parser (`parser::bam`), so the two input
//! paths only share the aggregation step.

use crate::record::RecordBatch;
use crate::time::parse_iso8601_to_epoch;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct NanoInfo {
    pub start_time: i64,
    pub channel_id: i32,
    pub length: u32,
    pub cumulative_error_rate: f64,
    pub duration: f32,
}

const INITIAL_CAPACITY: usize = 16 * 1024;

pub struct NanoStats {
    entries: Vec<NanoInfo>,
    min_time: Option<i64>,
    max_time: Option<i64>,
    skipped_reason: Option<String>,
}

impl Default for NanoStats {
    fn default() -> Self {
        Self::new()
    }
}

impl NanoStats {
    pub fn new() -> Self {
        NanoStats {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            min_time: None,
            max_time: None,
            skipped_reason: None,
        }
    }

    /// FASTQ path (spec.md §4.7.1): parses `ch=` and `start_time=` out of
    /// the whitespace-separated `key=value` fields following the first
    /// space in the read name.
    pub fn add_fastq(&mut self, batch: &RecordBatch) {
        if self.skipped_reason.is_some() {
            return;
        }
        for view in batch.iter() {
            let name = view.name();
            match parse_nanopore_header(name) {
                Some((channel, start_time)) => self.record(
                    start_time,
                    channel,
                    view.meta.sequence_length,
                    view.meta.accumulated_error_rate,
                    0.0,
                ),
                None => {
                    self.skipped_reason = Some(String::from_utf8_lossy(name).into_owned());
                    return;
                }
            }
        }
    }

    /// BAM path (spec.md §4.7.2): channel/start_time/duration are already
    /// in `RecordMeta`, populated by the BAM tag parser.
    pub fn add_bam(&mut self, batch: &RecordBatch) {
        for view in batch.iter() {
            let m = view.meta;
            self.record(
                m.start_time,
                m.channel,
                m.sequence_length,
                m.accumulated_error_rate,
                m.duration,
            );
        }
    }

    fn record(&mut self, start_time: i64, channel_id: i32, length: u32, cumulative_error_rate: f64, duration: f32) {
        self.min_time = Some(self.min_time.map_or(start_time, |m| m.min(start_time)));
        self.max_time = Some(self.max_time.map_or(start_time, |m| m.max(start_time)));
        self.entries.push(NanoInfo {
            start_time,
            channel_id,
            length,
            cumulative_error_rate,
            duration,
        });
    }

    pub fn entries(&self) -> &[NanoInfo] {
        &self.entries
    }

    pub fn min_time(&self) -> Option<i64> {
        self.min_time
    }

    pub fn max_time(&self) -> Option<i64> {
        self.max_time
    }

    pub fn skipped_reason(&self) -> Option<&str> {
        self.skipped_reason.as_deref()
    }
}

/// Returns `(channel, start_time_epoch_seconds)` or `None` if either field
/// is missing, malformed, or the name has no space-separated tail.
fn parse_nanopore_header(name: &[u8]) -> Option<(i32, i64)> {
    let space = name.iter().position(|&b| b == b' ')?;
    let tail = &name[space + 1..];

    let mut channel = None;
    let mut start_time = None;
    for field in tail.split(|&b| b == b' ') {
        if field.is_empty() {
            continue;
        }
        if let Some(rest) = field.strip_prefix(b"ch=") {
            channel = std::str::from_utf8(rest).ok().and_then(|s| s.parse::<i32>().ok());
        } else if let Some(rest) = field.strip_prefix(b"start_time=") {
            start_time = std::str::from_utf8(rest).ok().and_then(parse_iso8601_to_epoch);
        }
    }
    Some((channel?, start_time?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{FastqParser, Parser, SliceSource};

    fn batch_of(name: &str) -> RecordBatch {
        let raw = format!("@{name}\nACGT\n+\nIIII\n");
        let mut parser = FastqParser::with_capacity(SliceSource::new(raw.as_bytes()), 4096);
        parser.next_batch().unwrap().unwrap()
    }

    #[test]
    fn parses_channel_and_start_time() {
        let header = "read1 runid=abc ch=5 start_time=2021-05-18T12:34:56Z";
        let (ch, st) = parse_nanopore_header(header.as_bytes()).unwrap();
        assert_eq!(ch, 5);
        assert_eq!(st, 1621341296);
    }

    #[test]
    fn aggregates_min_max_time() {
        let mut stats = NanoStats::new();
        stats.add_fastq(&batch_of("r1 ch=1 start_time=2021-05-18T12:34:56Z"));
        stats.add_fastq(&batch_of("r2 ch=2 start_time=2021-05-18T10:00:00Z"));
        assert_eq!(stats.min_time(), Some(1621332000));
        assert_eq!(stats.max_time(), Some(1621341296));
        assert_eq!(stats.entries().len(), 2);
    }

    #[test]
    fn missing_field_self_disables() {
        let mut stats = NanoStats::new();
        stats.add_fastq(&batch_of("r1 ch=1"));
        assert!(stats.skipped_reason().is_some());
        stats.add_fastq(&batch_of("r2 ch=2 start_time=2021-05-18T10:00:00Z"));
        assert_eq!(stats.entries().len(), 0);
    }

    #[test]
    fn bam_path_does_not_parse_headers() {
        let mut stats = NanoStats::new();
        let mut batch = batch_of("r1"); // no key=value fields at all
        batch.metas_mut()[0].channel = 7;
        batch.metas_mut()[0].start_time = 1000;
        stats.add_bam(&batch);
        assert_eq!(stats.entries()[0].channel_id, 7);
        assert_eq!(stats.min_time(), Some(1000));
    }
}

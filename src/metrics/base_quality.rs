//! Per-position base/quality tabulation (spec.md §4.2).
//!
//! The dense `[position][class]` layout and the u16 staging tables that
//! get periodically folded into the u64 totals are this crate's adaptation
//! of the teacher's "grow owned buffers, never shrink" discipline
//! (`policy.rs`) to a two-dimensional accumulator instead of a byte
//! stream.

use crate::error::{Error, ErrorPosition};
use crate::lut::{error_rate, nuc_idx, phred_bucket, PHRED_BUCKETS, PHRED_MAX};
use crate::record::RecordBatch;
use crate::simd::count_acgt;

const NUC_CLASSES: usize = 5;

/// Per-position base/Phred count tables, GC distribution, and average-Phred
/// distribution over all reads seen so far.
pub struct BaseQualityTable {
    max_length: usize,
    base_counts: Vec<u64>,
    phred_counts: Vec<u64>,
    staging_base: Vec<u16>,
    staging_phred: Vec<u16>,
    /// Per-call counter; reaching `u16::MAX` triggers a flush (spec.md
    /// §4.2.1). A single crate-wide counter rather than a per-lane
    /// watermark: tracking the true maximum lane would require a reduction
    /// over the whole table on every add, which defeats the purpose of
    /// keeping the hot path in u16. A fixed-cadence flush after at most
    /// 65535 reads bounds every lane to at most that many increments,
    /// which is comfortably below `u16::MAX`.
    staging_count: u16,
    gc_distribution: [u64; 101],
    phred_score_distribution: [u64; PHRED_MAX + 1],
    number_of_reads: u64,
}

impl Default for BaseQualityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseQualityTable {
    pub fn new() -> Self {
        BaseQualityTable {
            max_length: 0,
            base_counts: Vec::new(),
            phred_counts: Vec::new(),
            staging_base: Vec::new(),
            staging_phred: Vec::new(),
            staging_count: 0,
            gc_distribution: [0; 101],
            phred_score_distribution: [0; PHRED_MAX + 1],
            number_of_reads: 0,
        }
    }

    fn ensure_capacity(&mut self, length: usize) {
        if length <= self.max_length {
            return;
        }
        self.base_counts.resize(length * NUC_CLASSES, 0);
        self.phred_counts.resize(length * PHRED_BUCKETS, 0);
        self.staging_base.resize(length * NUC_CLASSES, 0);
        self.staging_phred.resize(length * PHRED_BUCKETS, 0);
        self.max_length = length;
    }

    fn flush(&mut self) {
        for (dst, src) in self.base_counts.iter_mut().zip(self.staging_base.iter_mut()) {
            *dst += *src as u64;
            *src = 0;
        }
        for (dst, src) in self.phred_counts.iter_mut().zip(self.staging_phred.iter_mut()) {
            *dst += *src as u64;
            *src = 0;
        }
        self.staging_count = 0;
    }

    /// Processes one read. Returns the accumulated error rate to be
    /// written back into that read's `RecordMeta` by the caller.
    fn add_one(&mut self, index: u64, seq: &[u8], quals: &[u8]) -> Result<f64, Error> {
        let len = seq.len();
        self.ensure_capacity(len);

        for (pos, &b) in seq.iter().enumerate() {
            let idx = nuc_idx(b) as usize;
            self.staging_base[pos * NUC_CLASSES + idx] += 1;
        }

        let mut acc = 0.0f64;
        for (pos, &qb) in quals.iter().enumerate() {
            if qb < 33 {
                return Err(Error::InvalidPhred {
                    character: qb,
                    pos: ErrorPosition::new(index, None),
                });
            }
            let q = qb - 33;
            if q as usize > PHRED_MAX {
                return Err(Error::InvalidPhred {
                    character: qb,
                    pos: ErrorPosition::new(index, None),
                });
            }
            self.staging_phred[pos * PHRED_BUCKETS + phred_bucket(q)] += 1;
            acc += error_rate(q);
        }

        let [a, c, g, t] = count_acgt(seq);
        let acgt = a + c + g + t;
        let gc_pct = if acgt > 0 {
            (((c + g) as u64 * 200 + acgt as u64) / (acgt as u64 * 2)) as usize
        } else {
            0
        };
        self.gc_distribution[gc_pct.min(100)] += 1;

        if len > 0 {
            let avg_error = acc / len as f64;
            let phred = if avg_error <= 0.0 {
                PHRED_MAX as i64
            } else {
                (-10.0 * avg_error.log10()).round() as i64
            };
            let phred = phred.clamp(0, PHRED_MAX as i64) as usize;
            self.phred_score_distribution[phred] += 1;
        }

        self.staging_count = self.staging_count.saturating_add(1);
        if self.staging_count == u16::MAX {
            self.flush();
        }
        Ok(acc)
    }

    /// Consumes one batch, writing `accumulated_error_rate` back into each
    /// read's `RecordMeta` for later reuse by NanoStats (spec.md §4.2.2).
    pub fn add(&mut self, batch: &mut RecordBatch) -> Result<(), Error> {
        let (buffer, metas) = batch.split_mut();
        for meta in metas.iter_mut() {
            let index = self.number_of_reads;
            self.number_of_reads += 1;
            let seq_start = meta.sequence_offset as usize;
            let seq_end = seq_start + meta.sequence_length as usize;
            let qual_start = meta.qualities_offset as usize;
            let qual_end = qual_start + meta.sequence_length as usize;
            let acc = self.add_one(index, &buffer[seq_start..seq_end], &buffer[qual_start..qual_end])?;
            meta.accumulated_error_rate = acc;
        }
        Ok(())
    }

    pub fn number_of_reads(&self) -> u64 {
        self.number_of_reads
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// `base_counts()[pos][nuc_idx]`, flushed.
    pub fn base_counts(&mut self) -> Vec<[u64; NUC_CLASSES]> {
        self.flush();
        self.base_counts
            .chunks_exact(NUC_CLASSES)
            .map(|row| [row[0], row[1], row[2], row[3], row[4]])
            .collect()
    }

    /// `phred_counts()[pos][bucket]`, flushed.
    pub fn phred_counts(&mut self) -> Vec<[u64; PHRED_BUCKETS]> {
        self.flush();
        self.phred_counts
            .chunks_exact(PHRED_BUCKETS)
            .map(|row| {
                let mut out = [0u64; PHRED_BUCKETS];
                out.copy_from_slice(row);
                out
            })
            .collect()
    }

    pub fn gc_distribution(&self) -> [u64; 101] {
        self.gc_distribution
    }

    pub fn phred_score_distribution(&self) -> [u64; PHRED_MAX + 1] {
        self.phred_score_distribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{FastqParser, Parser, SliceSource};
    use crate::record::RecordMeta;

    fn batch_from(seqs: &[(&str, &str, &str)]) -> RecordBatch {
        let mut raw = Vec::new();
        for (name, seq, qual) in seqs {
            raw.extend_from_slice(format!("@{name}\n{seq}\n+\n{qual}\n").as_bytes());
        }
        let mut parser = FastqParser::with_capacity(SliceSource::new(&raw), 4096);
        let mut metas: Vec<RecordMeta> = Vec::new();
        let mut buffer = None;
        while let Some(batch) = parser.next_batch() {
            let batch = batch.unwrap();
            metas.extend(batch.iter().map(|v| *v.meta));
            buffer = Some(batch.buffer().clone());
        }
        RecordBatch::new(buffer.unwrap(), metas)
    }

    #[test]
    fn scenario_s1_fastq_basic() {
        let mut table = BaseQualityTable::new();
        let mut batch = batch_from(&[
            ("r1", "ACGTACGT", "IIIIIIII"),
            ("r2", "GGGGNNNN", "!!!!!!!!"),
        ]);
        table.add(&mut batch).unwrap();
        assert_eq!(table.number_of_reads(), 2);
        let base_counts = table.base_counts();
        // pos0: r1='A' -> idx1, r2='G' -> idx3
        assert_eq!(base_counts[0], [0, 1, 0, 1, 0]);
        let gc = table.gc_distribution();
        assert_eq!(gc[50], 1); // r1: 4 GC / 8 len = 50%
        assert_eq!(gc[100], 1); // r2: 4 GC / 4 non-N = 100%
    }

    #[test]
    fn base_counts_sum_to_total_length() {
        let mut table = BaseQualityTable::new();
        let mut batch = batch_from(&[("r1", "ACGTN", "IIIII"), ("r2", "AC", "II")]);
        table.add(&mut batch).unwrap();
        let sum: u64 = table.base_counts().iter().flatten().sum();
        assert_eq!(sum, 7);
    }

    #[test]
    fn gc_distribution_conserves_read_count() {
        let mut table = BaseQualityTable::new();
        let mut batch = batch_from(&[("r1", "ACGT", "IIII"), ("r2", "AAAA", "IIII")]);
        table.add(&mut batch).unwrap();
        let total: u64 = table.gc_distribution().iter().sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn rejects_invalid_phred_byte() {
        let mut table = BaseQualityTable::new();
        let raw = b"@r1\nACGT\n+\n\x01III\n".to_vec();
        let mut parser = FastqParser::with_capacity(SliceSource::new(&raw), 4096);
        let mut bad_batch = parser.next_batch().unwrap().unwrap();
        let err = table.add(&mut bad_batch).unwrap_err();
        assert!(matches::matches!(err, Error::InvalidPhred { .. }));
    }

    #[test]
    fn accumulated_error_rate_is_written_back() {
        let mut table = BaseQualityTable::new();
        let mut batch = batch_from(&[("r1", "AAAA", "!!!!")]); // q=0 everywhere
        table.add(&mut batch).unwrap();
        let view = batch.get(0).unwrap();
        assert!((view.meta.accumulated_error_rate - 4.0).abs() < 1e-9);
    }

    #[test]
    fn staging_flush_is_idempotent() {
        let mut table = BaseQualityTable::new();
        let mut batch = batch_from(&[("r1", "ACGT", "IIII")]);
        table.add(&mut batch).unwrap();
        let first = table.base_counts();
        let second = table.base_counts();
        assert_eq!(first, second);
    }
}

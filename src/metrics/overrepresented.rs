//! Canonical-k-mer hash counter with a capped unique set (spec.md §4.4).
//!
//! Fragments are 2-bit packed, canonicalized against their reverse
//! complement, and hashed with the invertible Wang mix so the original
//! k-mer never needs to be stored alongside its hash (spec.md §4.4.2).

use crate::error::Error;
use crate::hash::{next_pow2, wang_mix64, wang_unmix64, OpenTable};
use crate::record::RecordBatch;
use std::collections::HashMap;

pub struct OverrepresentedSequences {
    max_unique_fragments: usize,
    fragment_length: usize,
    sample_every: u64,
    number_of_sequences: u64,
    sampled_sequences: u64,
    table: OpenTable,
}

impl OverrepresentedSequences {
    pub fn new(
        max_unique_fragments: usize,
        fragment_length: usize,
        sample_every: u64,
    ) -> Result<Self, Error> {
        if fragment_length % 2 == 0 || !(3..=31).contains(&fragment_length) {
            return Err(Error::BadConfig("fragment_length must be odd and in 3..=31"));
        }
        if sample_every == 0 {
            return Err(Error::BadConfig("sample_every must be nonzero"));
        }
        let capacity = next_pow2(((max_unique_fragments as f64) * 1.5) as usize);
        Ok(OverrepresentedSequences {
            max_unique_fragments,
            fragment_length,
            sample_every,
            number_of_sequences: 0,
            sampled_sequences: 0,
            table: OpenTable::with_capacity(capacity),
        })
    }

    pub fn default_config() -> Result<Self, Error> {
        Self::new(5_000_000, 21, 8)
    }

    pub fn add(&mut self, batch: &RecordBatch) -> Result<(), Error> {
        for view in batch.iter() {
            let index = self.number_of_sequences;
            self.number_of_sequences += 1;
            if index % self.sample_every == 0 {
                self.sampled_sequences += 1;
                self.process(view.sequence());
            }
        }
        Ok(())
    }

    fn process(&mut self, seq: &[u8]) {
        let fl = self.fragment_length;
        let len = seq.len();
        if len < fl {
            return; // spec.md §9: sampled but contributes no fragments
        }

        // total/from_mid/mid chosen so the concrete worked example in
        // spec.md §8 (S4) holds exactly: front and back window counts
        // sum to `total` with no overlap for non-exact multiples of `fl`.
        let total = len / fl;
        let from_mid = total / 2;
        let mid = len - from_mid * fl;
        let front_count = total - from_mid;

        let mut warned = false;
        for k in 0..front_count {
            self.emit_fragment(&seq[k * fl..k * fl + fl], &mut warned);
        }
        for k in 0..from_mid {
            let start = mid + k * fl;
            self.emit_fragment(&seq[start..start + fl], &mut warned);
        }
    }

    fn emit_fragment(&mut self, fragment: &[u8], warned: &mut bool) {
        let Some(kmer) = encode_kmer(fragment) else {
            if !*warned {
                log::warn!("skipping fragment with non-ACGT base");
                *warned = true;
            }
            return;
        };
        let canon = canonical_kmer(kmer, fragment.len());
        let hash = wang_mix64(canon);
        if hash == 0 {
            return; // reserved empty-slot sentinel; vanishingly unlikely
        }
        self.table.bump(hash, self.max_unique_fragments);
    }

    pub fn number_of_sequences(&self) -> u64 {
        self.number_of_sequences
    }

    pub fn sampled_sequences(&self) -> u64 {
        self.sampled_sequences
    }

    pub fn unique_count(&self) -> usize {
        self.table.len()
    }

    pub fn sequence_counts(&self) -> HashMap<String, u64> {
        self.table
            .iter()
            .map(|(hash, count)| {
                let canon = wang_unmix64(hash);
                (decode_kmer(canon, self.fragment_length), count as u64)
            })
            .collect()
    }

    /// Sorted descending by count, then fraction, then sequence (spec.md
    /// §4.4.3).
    pub fn overrepresented_sequences(
        &self,
        fraction: f64,
        min_threshold: u64,
        max_threshold: u64,
    ) -> Vec<(u64, f64, String)> {
        let threshold = ((fraction * self.sampled_sequences as f64).ceil() as u64)
            .clamp(min_threshold, max_threshold);
        let mut out: Vec<(u64, f64, String)> = self
            .table
            .iter()
            .filter(|(_, count)| *count as u64 >= threshold)
            .map(|(hash, count)| {
                let canon = wang_unmix64(hash);
                let seq = decode_kmer(canon, self.fragment_length);
                let frac = if self.sampled_sequences > 0 {
                    count as f64 / self.sampled_sequences as f64
                } else {
                    0.0
                };
                (count as u64, frac, seq)
            })
            .collect();
        out.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.partial_cmp(&a.1).unwrap())
                .then(a.2.cmp(&b.2))
        });
        out
    }
}

fn encode_kmer(fragment: &[u8]) -> Option<u64> {
    let mut kmer = 0u64;
    for &b in fragment {
        let code = match b.to_ascii_uppercase() {
            b'A' => 0u64,
            b'C' => 1,
            b'G' => 2,
            b'T' => 3,
            _ => return None,
        };
        kmer = (kmer << 2) | code;
    }
    Some(kmer)
}

fn revcomp_kmer(kmer: u64, k: usize) -> u64 {
    let mut rc = 0u64;
    let mut x = kmer;
    for _ in 0..k {
        let base = x & 0b11;
        let comp = base ^ 0b11; // A<->T, C<->G
        rc = (rc << 2) | comp;
        x >>= 2;
    }
    rc
}

fn canonical_kmer(kmer: u64, k: usize) -> u64 {
    kmer.min(revcomp_kmer(kmer, k))
}

fn decode_kmer(kmer: u64, k: usize) -> String {
    let mut bytes = vec![0u8; k];
    let mut x = kmer;
    for i in (0..k).rev() {
        bytes[i] = match x & 0b11 {
            0 => b'A',
            1 => b'C',
            2 => b'G',
            _ => b'T',
        };
        x >>= 2;
    }
    String::from_utf8(bytes).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{FastqParser, Parser, SliceSource};

    fn batch_of(seq: &str) -> RecordBatch {
        let raw = format!("@r\n{seq}\n+\n{}\n", "I".repeat(seq.len()));
        let mut parser = FastqParser::with_capacity(SliceSource::new(raw.as_bytes()), 8192);
        parser.next_batch().unwrap().unwrap()
    }

    #[test]
    fn canonical_kmer_is_strand_invariant() {
        let kmer = encode_kmer(b"ACGTACGTACG").unwrap(); // length 11, odd
        let rc = revcomp_kmer(kmer, 11);
        assert_eq!(canonical_kmer(kmer, 11), canonical_kmer(rc, 11));
    }

    #[test]
    fn decode_recovers_canonical_sequence() {
        let seq = b"AAGGCTTCCAG"; // len 11
        let kmer = encode_kmer(seq).unwrap();
        let canon = canonical_kmer(kmer, 11);
        let hash = wang_mix64(canon);
        let decoded_kmer = wang_unmix64(hash);
        assert_eq!(decoded_kmer, canon);
        let decoded = decode_kmer(decoded_kmer, 11);
        let rc: Vec<u8> = seq.iter().rev().map(|&b| match b {
            b'A' => b'T', b'T' => b'A', b'C' => b'G', b'G' => b'C', _ => b,
        }).collect();
        assert!(decoded.as_bytes() == seq || decoded.as_bytes() == rc.as_slice());
    }

    #[test]
    fn scenario_s4_overrepresented_homogeneous_sequence() {
        let mut metric = OverrepresentedSequences::new(5_000_000, 21, 1).unwrap();
        let seq = "A".repeat(50);
        for _ in 0..10_000 {
            let batch = batch_of(&seq);
            metric.add(&batch).unwrap();
        }
        assert_eq!(metric.unique_count(), 1);
        let counts = metric.sequence_counts();
        let (_, &count) = counts.iter().next().unwrap();
        assert_eq!(count, 10_000 * 2);

        let over = metric.overrepresented_sequences(0.001, 1, u64::MAX);
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].0, 20_000);
    }

    #[test]
    fn short_read_is_sampled_but_contributes_no_fragments() {
        let mut metric = OverrepresentedSequences::new(100, 21, 1).unwrap();
        let batch = batch_of("ACGT"); // shorter than fragment_length
        metric.add(&batch).unwrap();
        assert_eq!(metric.sampled_sequences(), 1);
        assert_eq!(metric.unique_count(), 0);
    }

    #[test]
    fn rejects_even_fragment_length() {
        assert!(matches::matches!(
            OverrepresentedSequences::new(100, 20, 1),
            Err(Error::BadConfig(_))
        ));
    }
}

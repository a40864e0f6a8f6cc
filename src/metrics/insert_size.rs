//! Paired-end overlap / insert-size detection and adapter extraction
//! (spec.md §4.8).
//!
//! The detector is a pigeonhole heuristic: two 8-byte case-folded chunk
//! comparisons as a cheap prefilter, confirmed by a full 16-byte Hamming
//! distance check. It assumes both reads are in the forward orientation of
//! their own strand (spec.md §9: "a hard assumption in the overlap
//! detector; leave it unchanged").

use crate::error::Error;
use crate::hash::{murmur3_x64_64, next_pow2};
use crate::lut::revcomp;

const PROBE_LEN: usize = 16;
const CASE_FOLD_MASK: u64 = 0xDFDF_DFDF_DFDF_DFDF;
const MAX_ADAPTER_LEN: usize = 31;

fn case_fold_u64(chunk: &[u8]) -> u64 {
    let arr: [u8; 8] = chunk.try_into().expect("8-byte chunk");
    u64::from_ne_bytes(arr) & CASE_FOLD_MASK
}

fn hamming16(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .filter(|(&x, &y)| x.to_ascii_uppercase() != y.to_ascii_uppercase())
        .count() as u32
}

/// Returns the detected insert size, or 0 for "no overlap" (spec.md
/// §4.8.1). Reads shorter than 16 bytes can never overlap.
pub fn detect_insert_size(s1: &[u8], s2: &[u8]) -> u64 {
    if s1.len() < PROBE_LEN || s2.len() < PROBE_LEN {
        return 0;
    }
    let needle_start = revcomp(&s2[0..PROBE_LEN]);
    let needle_end = revcomp(&s2[s2.len() - PROBE_LEN..]);
    let ns0 = case_fold_u64(&needle_start[0..8]);
    let ns1 = case_fold_u64(&needle_start[8..16]);
    let ne0 = case_fold_u64(&needle_end[0..8]);
    let ne1 = case_fold_u64(&needle_end[8..16]);

    for i in 0..=(s1.len() - PROBE_LEN) {
        let window = &s1[i..i + PROBE_LEN];
        let w0 = case_fold_u64(&window[0..8]);
        let w1 = case_fold_u64(&window[8..16]);

        if (w0 == ns0 || w1 == ns1) && hamming16(window, &needle_start) <= 1 {
            return (i + PROBE_LEN) as u64;
        }
        if (w0 == ne0 || w1 == ne1) && hamming16(window, &needle_end) <= 1 {
            return (i + s2.len()) as u64;
        }
    }
    0
}

/// A capped open-addressed table keyed on MurmurHash3 of the candidate
/// bytes, verifying collisions by length + memcmp (spec.md §4.8.2). Unlike
/// `FingerprintTable` this stores the key bytes themselves, since adapters
/// must be returned by value, not reconstructed from an invertible hash.
struct AdapterTable {
    hashes: Vec<u64>,
    bytes: Vec<Vec<u8>>,
    counts: Vec<u64>,
    mask: u64,
    len: usize,
    max_entries: usize,
}

impl AdapterTable {
    fn with_capacity(max_entries: usize) -> Self {
        let capacity = next_pow2((max_entries * 2).max(2));
        AdapterTable {
            hashes: vec![0u64; capacity],
            bytes: vec![Vec::new(); capacity],
            counts: vec![0u64; capacity],
            mask: (capacity - 1) as u64,
            len: 0,
            max_entries,
        }
    }

    fn add(&mut self, candidate: &[u8]) {
        if candidate.is_empty() {
            return;
        }
        let hash = match murmur3_x64_64(candidate, 0) {
            0 => 1, // hash 0 is this table's empty-slot sentinel
            h => h,
        };
        let cap = self.hashes.len();
        let mut idx = (hash & self.mask) as usize;
        for _ in 0..cap {
            if self.hashes[idx] == 0 {
                if self.len >= self.max_entries {
                    return;
                }
                self.hashes[idx] = hash;
                self.bytes[idx] = candidate.to_vec();
                self.counts[idx] = 1;
                self.len += 1;
                return;
            }
            if self.hashes[idx] == hash && self.bytes[idx] == candidate {
                self.counts[idx] += 1;
                return;
            }
            idx = (idx + 1) & (cap - 1);
        }
    }

    fn entries(&self) -> Vec<(&[u8], u64)> {
        self.hashes
            .iter()
            .enumerate()
            .filter(|(_, &h)| h != 0)
            .map(|(i, _)| (self.bytes[i].as_slice(), self.counts[i]))
            .collect()
    }
}

pub struct InsertSizeMetrics {
    insert_sizes: Vec<u64>,
    adapters_read1: AdapterTable,
    adapters_read2: AdapterTable,
}

impl InsertSizeMetrics {
    pub fn new(max_adapters: usize) -> Result<Self, Error> {
        if max_adapters == 0 {
            return Err(Error::BadConfig("max_adapters must be nonzero"));
        }
        Ok(InsertSizeMetrics {
            insert_sizes: Vec::new(),
            adapters_read1: AdapterTable::with_capacity(max_adapters),
            adapters_read2: AdapterTable::with_capacity(max_adapters),
        })
    }

    pub fn default_config() -> Result<Self, Error> {
        Self::new(10_000)
    }

    pub fn add_pair(&mut self, s1: &[u8], s2: &[u8]) {
        let insert_size = detect_insert_size(s1, s2);
        let idx = insert_size as usize;
        if self.insert_sizes.len() <= idx {
            self.insert_sizes.resize(idx + 1, 0);
        }
        self.insert_sizes[idx] += 1;

        if insert_size == 0 {
            return;
        }
        let iu = insert_size as usize;
        if iu < s1.len() {
            let tail = &s1[iu..];
            self.adapters_read1.add(&tail[..tail.len().min(MAX_ADAPTER_LEN)]);
        }
        if iu < s2.len() {
            let tail = &s2[iu..];
            self.adapters_read2.add(&tail[..tail.len().min(MAX_ADAPTER_LEN)]);
        }
    }

    pub fn insert_sizes(&self) -> &[u64] {
        &self.insert_sizes
    }

    pub fn adapters_read1(&self) -> Vec<(&[u8], u64)> {
        self.adapters_read1.entries()
    }

    pub fn adapters_read2(&self) -> Vec<(&[u8], u64)> {
        self.adapters_read2.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_full_overlap() {
        // s2 is the reverse complement of a 16bp suffix of s1 starting at 10.
        let s1 = b"AAAAAAAAAACCCCGGGGTTTTACGT";
        let suffix = &s1[10..]; // 16 bytes: CCCCGGGGTTTTACGT
        assert_eq!(suffix.len(), 16);
        let s2 = revcomp(suffix);
        let insert = detect_insert_size(s1, &s2);
        assert_eq!(insert, 26);
    }

    #[test]
    fn no_overlap_returns_zero() {
        let s1 = vec![b'A'; 40];
        let s2 = vec![b'C'; 40];
        assert_eq!(detect_insert_size(&s1, &s2), 0);
    }

    #[test]
    fn short_reads_never_overlap() {
        assert_eq!(detect_insert_size(b"ACGT", b"ACGT"), 0);
    }

    #[test]
    fn adapter_tails_are_counted_on_overlap() {
        let mut metrics = InsertSizeMetrics::new(100).unwrap();
        let core = b"ACGTACGTACGTACGTACGT"; // 20bp shared region
        let s1 = [core.as_slice(), b"ADAPTERTAIL1"].concat();
        let rc = revcomp(core);
        let s2 = [rc.as_slice(), b"ADAPTERTAIL2"].concat();
        metrics.add_pair(&s1, &s2);
        assert!(metrics.insert_sizes().iter().skip(1).any(|&c| c > 0));
    }

    #[test]
    fn rejects_zero_max_adapters() {
        assert!(matches::matches!(
            InsertSizeMetrics::new(0),
            Err(Error::BadConfig(_))
        ));
    }
}

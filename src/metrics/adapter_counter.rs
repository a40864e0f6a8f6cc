//! Bit-parallel multi-pattern adapter matcher (spec.md §4.3).
//!
//! Shift-AND automata for every configured adapter are packed end-to-end
//! into one or more 64-bit "matchers"; a single pass over the read
//! advances every matcher's register in lockstep, crediting each adapter
//! only at its earliest occurrence.

use crate::error::Error;
use crate::lut::nuc_idx;
use crate::record::RecordBatch;

struct AdapterSlot {
    adapter_index: usize,
    length: u8,
    found_bit: u64,
}

struct Matcher {
    /// `bitmask[nuc_idx]`: bit `i` set iff the packed character at offset
    /// `i` belongs to that nucleotide class.
    bitmask: [u64; 5],
    init_mask: u64,
    found_mask: u64,
    slots: Vec<AdapterSlot>,
}

impl Matcher {
    fn build(packed: &[u8], init_mask: u64, found_mask: u64, slots: Vec<AdapterSlot>) -> Self {
        let mut bitmask = [0u64; 5];
        for (i, &b) in packed.iter().enumerate() {
            let class = nuc_idx(b) as usize;
            bitmask[class] |= 1u64 << i;
        }
        Matcher {
            bitmask,
            init_mask,
            found_mask,
            slots,
        }
    }
}

/// For each configured adapter and each read, records the earliest 0-based
/// start position at which it occurs (exact, case-insensitive match).
pub struct AdapterCounter {
    adapters: Vec<Vec<u8>>,
    matchers: Vec<Matcher>,
    /// `counts[adapter_index][start_position]`.
    counts: Vec<Vec<u64>>,
    max_length: usize,
}

impl AdapterCounter {
    pub fn new(adapters: Vec<Vec<u8>>) -> Result<Self, Error> {
        for a in &adapters {
            if a.is_empty() || a.len() > 64 {
                return Err(Error::BadConfig("adapter length must be in 1..=64"));
            }
        }
        let matchers = Self::build_matchers(&adapters);
        let counts = adapters.iter().map(|_| Vec::new()).collect();
        Ok(AdapterCounter {
            adapters,
            matchers,
            counts,
            max_length: 0,
        })
    }

    fn build_matchers(adapters: &[Vec<u8>]) -> Vec<Matcher> {
        let mut matchers = Vec::new();
        let mut packed = Vec::new();
        let mut init_mask = 0u64;
        let mut found_mask = 0u64;
        let mut slots = Vec::new();

        for (idx, adapter) in adapters.iter().enumerate() {
            let len = adapter.len();
            if packed.len() + len > 64 {
                matchers.push(Matcher::build(&packed, init_mask, found_mask, slots));
                packed = Vec::new();
                init_mask = 0;
                found_mask = 0;
                slots = Vec::new();
            }
            let offset = packed.len();
            init_mask |= 1u64 << offset;
            let found_bit = 1u64 << (offset + len - 1);
            found_mask |= found_bit;
            slots.push(AdapterSlot {
                adapter_index: idx,
                length: len as u8,
                found_bit,
            });
            packed.extend_from_slice(adapter);
        }
        if !packed.is_empty() {
            matchers.push(Matcher::build(&packed, init_mask, found_mask, slots));
        }
        matchers
    }

    fn ensure_capacity(&mut self, length: usize) {
        if length <= self.max_length {
            return;
        }
        for row in &mut self.counts {
            row.resize(length, 0);
        }
        self.max_length = length;
    }

    fn add_one(&mut self, seq: &[u8]) {
        self.ensure_capacity(seq.len());

        let mut registers = vec![0u64; self.matchers.len()];
        let mut already_found = vec![0u64; self.matchers.len()];
        let mut hits: Vec<Option<usize>> = vec![None; self.adapters.len()];

        for (j, &base) in seq.iter().enumerate() {
            let class = nuc_idx(base) as usize;
            for (m_idx, matcher) in self.matchers.iter().enumerate() {
                let r = &mut registers[m_idx];
                *r = (*r << 1) | matcher.init_mask;
                *r &= matcher.bitmask[class];
                if *r & matcher.found_mask == 0 {
                    continue;
                }
                for slot in &matcher.slots {
                    if slot.found_bit & *r != 0 && already_found[m_idx] & slot.found_bit == 0 {
                        let start = j + 1 - slot.length as usize;
                        hits[slot.adapter_index] = Some(start);
                        already_found[m_idx] |= slot.found_bit;
                    }
                }
            }
        }

        for (adapter_index, hit) in hits.into_iter().enumerate() {
            if let Some(start) = hit {
                self.counts[adapter_index][start] += 1;
            }
        }
    }

    pub fn add(&mut self, batch: &RecordBatch) -> Result<(), Error> {
        for view in batch.iter() {
            self.add_one(view.sequence());
        }
        Ok(())
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// `[(adapter_bytes, counts_per_position)]`, each row sized
    /// `max_length` (spec.md §4.3.3). Empty when no reads have been added
    /// (spec.md §9's open question: the legacy implementation errors in
    /// this case, the canonical design returns empty arrays instead).
    pub fn get_counts(&self) -> Vec<(&[u8], &[u64])> {
        self.adapters
            .iter()
            .zip(self.counts.iter())
            .map(|(a, c)| (a.as_slice(), c.as_slice()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{FastqParser, Parser, SliceSource};

    fn batch_of(seq: &str) -> RecordBatch {
        let raw = format!("@r1\n{seq}\n+\n{}\n", "I".repeat(seq.len()));
        let mut parser = FastqParser::with_capacity(SliceSource::new(raw.as_bytes()), 8192);
        parser.next_batch().unwrap().unwrap()
    }

    #[test]
    fn scenario_s2_single_adapter() {
        let adapter = b"AGATCGGAAGAG".to_vec();
        let mut counter = AdapterCounter::new(vec![adapter.clone()]).unwrap();
        let seq = format!("{}{}{}", "A".repeat(40), "AGATCGGAAGAG", "C".repeat(10));
        let batch = batch_of(&seq);
        counter.add(&batch).unwrap();
        let counts = counter.get_counts();
        assert_eq!(counts[0].1[40], 1);
        assert_eq!(counts[0].1.iter().sum::<u64>(), 1);
    }

    #[test]
    fn scenario_s3_repeated_adapter_earliest_only() {
        let adapter = b"AGATCGGAAGAG".to_vec();
        let mut counter = AdapterCounter::new(vec![adapter.clone()]).unwrap();
        let seq = format!("AGATCGGAAGAG{}AGATCGGAAGAG", "N".repeat(20));
        let batch = batch_of(&seq);
        counter.add(&batch).unwrap();
        let counts = counter.get_counts();
        assert_eq!(counts[0].1[0], 1);
        assert_eq!(counts[0].1[32], 0);
        assert_eq!(counts[0].1.iter().sum::<u64>(), 1);
    }

    #[test]
    fn empty_counter_returns_empty_arrays() {
        let counter = AdapterCounter::new(vec![b"ACGT".to_vec()]).unwrap();
        let counts = counter.get_counts();
        assert_eq!(counts[0].1.len(), 0);
    }

    #[test]
    fn multiple_adapters_spanning_two_matchers() {
        // 5 adapters of 14 bytes each = 70 bits, forces a second matcher.
        let adapters: Vec<Vec<u8>> = (0..5)
            .map(|i| format!("ACGTACGTACGT{:02}", i).into_bytes())
            .collect();
        let counter = AdapterCounter::new(adapters).unwrap();
        assert!(counter.matchers.len() >= 2);
    }

    #[test]
    fn case_insensitive_match() {
        let adapter = b"AGATCGGAAGAG".to_vec();
        let mut counter = AdapterCounter::new(vec![adapter]).unwrap();
        let seq = format!("{}{}", "a".repeat(5), "agatcggaagag");
        let batch = batch_of(&seq);
        counter.add(&batch).unwrap();
        assert_eq!(counter.get_counts()[0].1[5], 1);
    }

    #[test]
    fn rejects_oversized_adapter() {
        let adapter = vec![b'A'; 65];
        assert!(matches::matches!(
            AdapterCounter::new(vec![adapter]),
            Err(Error::BadConfig(_))
        ));
    }
}

//! Lookup tables shared by every metric: nucleotide classification, its
//! complement, and Phred-to-error-probability. Built once; see spec.md §9.

use std::sync::OnceLock;

/// Number of nucleotide classes: N, A, C, G, T.
pub const NUC_CLASSES: usize = 5;

pub const NUC_N: u8 = 0;
pub const NUC_A: u8 = 1;
pub const NUC_C: u8 = 2;
pub const NUC_G: u8 = 3;
pub const NUC_T: u8 = 4;

/// Highest legal Phred score (`spec.md` invariant 3).
pub const PHRED_MAX: usize = 93;
/// `PHRED_LIMIT` in spec.md §4.2.1: phreds are bucketed by `min(q,47)>>2`.
pub const PHRED_BUCKET_LIMIT: u8 = 47;
pub const PHRED_BUCKETS: usize = (PHRED_BUCKET_LIMIT as usize / 4) + 1;

const fn build_nuc_lut() -> [u8; 128] {
    let mut table = [NUC_N; 128];
    table[b'A' as usize] = NUC_A;
    table[b'a' as usize] = NUC_A;
    table[b'C' as usize] = NUC_C;
    table[b'c' as usize] = NUC_C;
    table[b'G' as usize] = NUC_G;
    table[b'g' as usize] = NUC_G;
    table[b'T' as usize] = NUC_T;
    table[b't' as usize] = NUC_T;
    table
}

/// ASCII -> `{0:N, 1:A, 2:C, 3:G, 4:T}`. All non-ACGT bytes collapse to N
/// (spec.md invariant 4). Indexing with a byte `>= 128` is a caller bug
/// (the parsers reject non-ASCII input before this table is ever touched).
pub static NUC_LUT: [u8; 128] = build_nuc_lut();

const fn build_complement_lut() -> [u8; 128] {
    let mut table = [b'N'; 128];
    table[b'A' as usize] = b'T';
    table[b'a' as usize] = b't';
    table[b'C' as usize] = b'G';
    table[b'c' as usize] = b'g';
    table[b'G' as usize] = b'C';
    table[b'g' as usize] = b'c';
    table[b'T' as usize] = b'A';
    table[b't' as usize] = b'a';
    table[b'N' as usize] = b'N';
    table[b'n' as usize] = b'n';
    table
}

/// Complement of an ASCII nucleotide byte (identity on anything non-ACGTN).
pub static COMPLEMENT_LUT: [u8; 128] = build_complement_lut();

#[inline]
pub fn nuc_idx(base: u8) -> u8 {
    NUC_LUT[(base & 0x7f) as usize]
}

#[inline]
pub fn complement(base: u8) -> u8 {
    COMPLEMENT_LUT[(base & 0x7f) as usize]
}

/// Reverse-complement a nucleotide sequence.
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

static PHRED_ERROR_LUT: OnceLock<[f64; PHRED_MAX + 1]> = OnceLock::new();

/// `error_rate(q) = 10^(-q/10)`, built once from the formula (spec.md §9:
/// "must be built at initialization ... not hard-coded at lower
/// precision").
#[inline]
pub fn error_rate(q: u8) -> f64 {
    let table = PHRED_ERROR_LUT.get_or_init(|| {
        let mut table = [0.0f64; PHRED_MAX + 1];
        for (q, slot) in table.iter_mut().enumerate() {
            *slot = 10f64.powf(-(q as f64) / 10.0);
        }
        table
    });
    table[(q as usize).min(PHRED_MAX)]
}

/// Phred bucket used by the 2-D quality table: `min(q,47) >> 2`.
#[inline]
pub fn phred_bucket(q: u8) -> usize {
    (q.min(PHRED_BUCKET_LIMIT) >> 2) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nuc_lut_collapses_to_n() {
        assert_eq!(nuc_idx(b'A'), NUC_A);
        assert_eq!(nuc_idx(b'a'), NUC_A);
        assert_eq!(nuc_idx(b'Z'), NUC_N);
        assert_eq!(nuc_idx(b'-'), NUC_N);
    }

    #[test]
    fn complement_round_trips() {
        assert_eq!(revcomp(b"ACGT"), b"ACGT");
        assert_eq!(revcomp(b"AAGG"), b"CCTT");
        assert_eq!(revcomp(b"AAAA"), b"TTTT");
    }

    #[test]
    fn error_rate_matches_formula() {
        assert!((error_rate(10) - 0.1).abs() < 1e-12);
        assert!((error_rate(0) - 1.0).abs() < 1e-12);
        assert!((error_rate(93) - 10f64.powf(-9.3)).abs() < 1e-12);
    }

    #[test]
    fn phred_bucket_caps_at_47() {
        assert_eq!(phred_bucket(0), 0);
        assert_eq!(phred_bucket(47), 11);
        assert_eq!(phred_bucket(93), 11);
    }
}

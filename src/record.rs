//! Zero-copy record views into an owned, shared byte buffer.
//!
//! Mirrors the teacher's `RefRecord`/`BufferPosition`/`RecordSet` split
//! (`fastq.rs`), generalized per spec.md §3: the buffer is shared
//! (`Arc<[u8]>`, spec.md §9's "canonical model ... express it as a shared
//! owner") instead of borrowed, so a batch can be retained by more than one
//! metric past the parser's next call, and positions are stored as plain
//! 32-bit offsets in a cache-line-sized `RecordMeta` rather than as a
//! line-oriented `BufferPosition`.

use std::sync::Arc;

/// Per-record offsets into a `RecordBuffer`, plus scratch fields written by
/// BaseQualityTable/the BAM tag parser (spec.md §3's `RecordMeta`).
///
/// Tuned to 64 bytes (one cache line) per spec.md §9; field order is part
/// of that budget and must not be reshuffled casually.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct RecordMeta {
    pub name_offset: u32,
    pub name_length: u32,
    pub sequence_offset: u32,
    pub sequence_length: u32,
    pub qualities_offset: u32,
    /// Reserved / padding to keep the head at a 24-byte prefix; also used
    /// by the BAM parser to stash `l_read_name`-derived alignment.
    pub _reserved: u32,
    /// Mean per-base error rate accumulated by BaseQualityTable
    /// (spec.md §4.2.2), consumed by NanoStats (spec.md §4.7.3).
    pub accumulated_error_rate: f64,
    /// Nanopore `start_time` (Unix epoch seconds), or 0 if unknown.
    pub start_time: i64,
    /// Nanopore `duration`, if known.
    pub duration: f32,
    /// Nanopore `channel`, or -1 if unknown.
    pub channel: i32,
    /// Padding to round the struct up to exactly one 64-byte cache line
    /// (spec.md §9). Room for future scratch fields without growing past
    /// the budget.
    _pad: [u8; 16],
}

const _: () = assert!(std::mem::size_of::<RecordMeta>() == 64);

impl RecordMeta {
    pub fn empty() -> Self {
        RecordMeta {
            name_offset: 0,
            name_length: 0,
            sequence_offset: 0,
            sequence_length: 0,
            qualities_offset: 0,
            _reserved: 0,
            accumulated_error_rate: 0.0,
            start_time: 0,
            duration: 0.0,
            channel: -1,
            _pad: [0; 16],
        }
    }
}

/// Owned, immutable, shareable backing storage for one batch of records
/// (spec.md §3's `RecordBuffer`). `Arc` gives every metric that wants to
/// retain a batch past the parser's next call a cheap shared reference
/// instead of forcing a copy (spec.md §9).
pub type RecordBuffer = Arc<[u8]>;

/// A read-only view of one record's fields, borrowed from a `RecordBatch`.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    buffer: &'a [u8],
    pub meta: &'a RecordMeta,
}

impl<'a> RecordView<'a> {
    #[inline]
    pub fn name(&self) -> &'a [u8] {
        let m = self.meta;
        &self.buffer[m.name_offset as usize..(m.name_offset + m.name_length) as usize]
    }

    #[inline]
    pub fn sequence(&self) -> &'a [u8] {
        let m = self.meta;
        &self.buffer[m.sequence_offset as usize..(m.sequence_offset + m.sequence_length) as usize]
    }

    #[inline]
    pub fn qualities(&self) -> &'a [u8] {
        let m = self.meta;
        &self.buffer
            [m.qualities_offset as usize..(m.qualities_offset + m.sequence_length) as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.meta.sequence_length as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch of record views sharing one `RecordBuffer` (spec.md §3's
/// `RecordBatch`). Produced by a `Parser`, consumed by every metric;
/// never empty except for the terminal end-of-stream marker (spec.md
/// §4.1: "each batch containing at least one record").
#[derive(Debug, Clone)]
pub struct RecordBatch {
    buffer: RecordBuffer,
    metas: Vec<RecordMeta>,
}

impl RecordBatch {
    pub fn new(buffer: RecordBuffer, metas: Vec<RecordMeta>) -> Self {
        RecordBatch { buffer, metas }
    }

    pub fn empty() -> Self {
        RecordBatch {
            buffer: Arc::from(&b""[..]),
            metas: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.metas.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    #[inline]
    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    #[inline]
    pub fn metas_mut(&mut self) -> &mut [RecordMeta] {
        &mut self.metas
    }

    /// Splits into the immutable backing bytes and a mutable view of the
    /// metas, for metrics (BaseQualityTable, the BAM tag parser) that read
    /// sequence bytes while writing scratch fields back into the same
    /// batch's metas.
    #[inline]
    pub fn split_mut(&mut self) -> (&[u8], &mut [RecordMeta]) {
        (&self.buffer, &mut self.metas)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<RecordView<'_>> {
        self.metas.get(index).map(|meta| RecordView {
            buffer: &self.buffer,
            meta,
        })
    }

    pub fn iter(&self) -> RecordBatchIter<'_> {
        RecordBatchIter {
            buffer: &self.buffer,
            metas: self.metas.iter(),
        }
    }
}

impl<'a> IntoIterator for &'a RecordBatch {
    type Item = RecordView<'a>;
    type IntoIter = RecordBatchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct RecordBatchIter<'a> {
    buffer: &'a [u8],
    metas: std::slice::Iter<'a, RecordMeta>,
}

impl<'a> Iterator for RecordBatchIter<'a> {
    type Item = RecordView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.metas.next().map(|meta| RecordView {
            buffer: self.buffer,
            meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_meta_is_cache_line_sized() {
        assert_eq!(std::mem::size_of::<RecordMeta>(), 64);
    }

    #[test]
    fn batch_view_reads_back_fields() {
        let buf: RecordBuffer = Arc::from(&b"r1\nACGT\nIIII"[..]);
        let meta = RecordMeta {
            name_offset: 0,
            name_length: 2,
            sequence_offset: 3,
            sequence_length: 4,
            qualities_offset: 8,
            ..RecordMeta::empty()
        };
        let batch = RecordBatch::new(buf, vec![meta]);
        let view = batch.get(0).unwrap();
        assert_eq!(view.name(), b"r1");
        assert_eq!(view.sequence(), b"ACGT");
        assert_eq!(view.qualities(), b"IIII");
    }
}

//! Shared parser plumbing: the `ByteSource` I/O seam (spec.md §6), the
//! growable-buffer protocol that both `FastqParser` and `BamParser` build
//! on (spec.md §4.1.2), and the `Parser` trait that makes them
//! interchangeable to the driver.
//!
//! The buffering discipline (memmove leftover prefix to the front, refill
//! the rest, grow on demand) is the same state machine the teacher's
//! `fastq::Reader` implements in `next_complete`/`make_room`/`grow`
//! (`src/fastq.rs`), generalized here to work over the `ByteSource` trait
//! instead of `io::Read` + `buffer_redux::BufReader`, since the engine
//! must not assume its input implements `io::Read` (spec.md §6: "The
//! engine does not open files, does not decompress").

pub mod bam;
pub mod fastq;

use crate::error::Error;
use crate::policy::{BufPolicy, StdPolicy};
use crate::record::RecordBatch;
use std::io;

/// The engine's sole I/O seam (spec.md §6). `0` indicates EOF.
pub trait ByteSource {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

/// Adapts any `io::Read` into a `ByteSource`, for convenience when driving
/// the engine directly from a file or in-memory cursor in tests; the
/// engine itself never constructs one of these on its own.
pub struct IoSource<R>(pub R);

impl<R: io::Read> ByteSource for IoSource<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.0.read(buf)?)
    }
}

/// A `ByteSource` over an in-memory byte slice, used heavily in tests.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }
}

impl<'a> ByteSource for SliceSource<'a> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Common interface implemented by `FastqParser` and `BamParser` (spec.md
/// §2: "Two variants ... Emits `RecordBatch`").
pub trait Parser {
    /// Parses and returns the next batch of complete records found in one
    /// buffer fill. Returns `None` at end of stream. A partial record
    /// preceding an error is never returned (spec.md §7).
    fn next_batch(&mut self) -> Option<Result<RecordBatch, Error>>;

    /// Reads exactly `n` records, growing the buffer/refilling as needed.
    /// Returns fewer than `n` only at end of stream (spec.md §4.1.2).
    fn read(&mut self, n: usize) -> Option<Result<RecordBatch, Error>>;
}

/// Growable owned byte buffer implementing the memmove-leftover / refill /
/// grow-on-demand protocol shared by both parsers.
pub(crate) struct GrowBuffer<P = StdPolicy> {
    data: Vec<u8>,
    /// Number of valid (filled) bytes at the front of `data`.
    filled: usize,
    policy: P,
}

impl GrowBuffer<StdPolicy> {
    pub fn with_capacity(capacity: usize) -> Self {
        GrowBuffer {
            data: vec![0u8; capacity.max(16)],
            filled: 0,
            policy: StdPolicy,
        }
    }
}

impl<P: BufPolicy> GrowBuffer<P> {
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Discards the first `consumed` bytes, moving the remainder to the
    /// front (the teacher's `make_room`).
    pub fn consume(&mut self, consumed: usize) {
        debug_assert!(consumed <= self.filled);
        self.data.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
    }

    /// Grows the backing capacity per the configured policy. Errors with
    /// `CapacityExceeded` if the policy refuses to grow further.
    pub fn grow(&mut self) -> Result<(), Error> {
        let current = self.data.len();
        let new_size = self
            .policy
            .grow_limited(current)
            .ok_or(Error::CapacityExceeded)?;
        self.data.resize(new_size, 0);
        Ok(())
    }

    /// Reads as many bytes as fit in the unfilled tail of the buffer,
    /// looping on the source until it is full or the source returns 0
    /// (the teacher's `fill_buf`). Returns the number of bytes newly read.
    pub fn fill(&mut self, source: &mut dyn ByteSource) -> Result<usize, Error> {
        let mut total = 0;
        loop {
            if self.filled >= self.data.len() {
                break;
            }
            let n = source.read_into(&mut self.data[self.filled..])?;
            if n == 0 {
                break;
            }
            self.filled += n;
            total += n;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_buffer_fills_and_consumes() {
        let mut buf = GrowBuffer::with_capacity(8);
        let mut src = SliceSource::new(b"ABCDEFGHIJ");
        let n = buf.fill(&mut src).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf.filled(), b"ABCDEFGH");
        buf.consume(3);
        assert_eq!(buf.filled(), b"DEFGH");
    }

    #[test]
    fn grow_buffer_grows_capacity() {
        let mut buf = GrowBuffer::with_capacity(8);
        buf.grow().unwrap();
        assert!(buf.capacity() > 8);
    }
}

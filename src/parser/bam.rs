//! BAM parser (spec.md §4.1.3).
//!
//! Unlike FASTQ, a BAM record's total length is known up front
//! (`block_size`), so there is no line-search state machine to resume:
//! the parser only ever needs "wait for N more contiguous bytes", which
//! `ensure_bytes` implements on top of the same `GrowBuffer` protocol
//! `FastqParser` uses.

use crate::error::{Error, ErrorPosition};
use crate::parser::{ByteSource, GrowBuffer, Parser};
use crate::policy::StdPolicy;
use crate::record::{RecordBatch, RecordBuffer, RecordMeta};
use crate::time::parse_iso8601_to_epoch;
use std::sync::Arc;

pub const DEFAULT_BUFFER_SIZE: usize = 48 * 1024;

const MAGIC: &[u8; 4] = b"BAM\x01";
/// BAM's 4-bit nibble -> IUPAC base table (SAM spec `seq_nt16_str`).
const NIBBLE_TO_BASE: [u8; 16] = *b"=ACMGRSVTWYHKDBN";

pub struct BamParser<S> {
    source: S,
    buf: GrowBuffer<StdPolicy>,
    cursor: usize,
    /// Opaque SAM header text, captured once at construction.
    header_text: Vec<u8>,
    record_index: u64,
    finished: bool,
}

impl<S: ByteSource> BamParser<S> {
    pub fn new(source: S) -> Result<Self, Error> {
        Self::with_capacity(source, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(source: S, capacity: usize) -> Result<Self, Error> {
        let mut parser = BamParser {
            source,
            buf: GrowBuffer::with_capacity(capacity),
            cursor: 0,
            header_text: Vec::new(),
            record_index: 0,
            finished: false,
        };
        parser.parse_header()?;
        Ok(parser)
    }

    pub fn header_text(&self) -> &[u8] {
        &self.header_text
    }

    fn pos_err(&self) -> ErrorPosition {
        ErrorPosition::new(self.record_index, None)
    }

    /// Ensures at least `nbytes` bytes are available starting at
    /// `self.cursor`, growing and/or refilling the buffer as needed.
    /// Returns `Ok(false)` only when the stream ended exactly on a record
    /// boundary (no bytes pending at all).
    fn ensure_bytes(&mut self, nbytes: usize) -> Result<bool, Error> {
        loop {
            if self.buf.filled().len() - self.cursor >= nbytes {
                return Ok(true);
            }
            if self.cursor + nbytes > self.buf.capacity() {
                if self.cursor > 0 {
                    self.compact();
                }
                while self.buf.filled().len() + nbytes > self.buf.capacity() {
                    self.buf.grow()?;
                }
            } else if self.buf.filled().len() == self.buf.capacity() {
                self.compact();
            }
            let n = self.buf.fill(&mut self.source)?;
            if n == 0 {
                let pending = self.buf.filled().len() - self.cursor;
                if pending >= nbytes {
                    return Ok(true);
                }
                if pending == 0 {
                    return Ok(false);
                }
                return Err(Error::Eof { pos: self.pos_err() });
            }
        }
    }

    fn compact(&mut self) {
        self.buf.consume(self.cursor);
        self.cursor = 0;
    }

    #[inline]
    fn slice(&self, len: usize) -> &[u8] {
        &self.buf.filled()[self.cursor..self.cursor + len]
    }

    fn take_u8(&mut self) -> u8 {
        let v = self.buf.filled()[self.cursor];
        self.cursor += 1;
        v
    }

    fn take_u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.slice(2).try_into().unwrap());
        self.cursor += 2;
        v
    }

    fn take_i32(&mut self) -> i32 {
        let v = i32::from_le_bytes(self.slice(4).try_into().unwrap());
        self.cursor += 4;
        v
    }

    fn take_u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.slice(4).try_into().unwrap());
        self.cursor += 4;
        v
    }

    fn take_f32(&mut self) -> f32 {
        let v = f32::from_le_bytes(self.slice(4).try_into().unwrap());
        self.cursor += 4;
        v
    }

    fn take_bytes(&mut self, len: usize) -> &[u8] {
        let start = self.cursor;
        self.cursor += len;
        &self.buf.filled()[start..start + len]
    }

    fn parse_header(&mut self) -> Result<(), Error> {
        if !self.ensure_bytes(4)? || self.slice(4) != MAGIC {
            return Err(Error::BadFormat {
                reason: "bad BAM magic",
                byte_or_context: format!("{:?}", &self.buf.filled()[self.cursor..self.cursor + 4.min(self.buf.filled().len() - self.cursor)]),
                pos: self.pos_err(),
            });
        }
        self.cursor += 4;

        if !self.ensure_bytes(4)? {
            return Err(Error::Eof { pos: self.pos_err() });
        }
        let l_text = self.take_u32() as usize;

        if !self.ensure_bytes(l_text)? {
            return Err(Error::Eof { pos: self.pos_err() });
        }
        self.header_text = self.take_bytes(l_text).to_vec();

        if !self.ensure_bytes(4)? {
            return Err(Error::Eof { pos: self.pos_err() });
        }
        let n_ref = self.take_u32();

        for _ in 0..n_ref {
            if !self.ensure_bytes(4)? {
                return Err(Error::Eof { pos: self.pos_err() });
            }
            let l_name = self.take_u32() as usize;
            // l_name + 4 (l_ref field that follows the name)
            if !self.ensure_bytes(l_name + 4)? {
                return Err(Error::Eof { pos: self.pos_err() });
            }
            self.cursor += l_name; // name, NUL-terminated; unused downstream
            self.take_u32(); // l_ref, unused downstream
        }
        self.compact();
        Ok(())
    }

    /// Parses exactly one record's worth of bytes (already guaranteed
    /// present by the caller) into a `RecordMeta` plus its FASTQ-layout
    /// bytes appended to `out`.
    fn parse_record(&mut self, out: &mut Vec<u8>) -> Result<RecordMeta, Error> {
        let record_start = self.cursor;
        let block_size = self.take_u32() as usize;
        let block_end = self.cursor + block_size;

        self.take_i32(); // ref_id
        self.take_i32(); // pos
        let l_read_name = self.take_u8() as usize;
        self.take_u8(); // mapq
        self.take_u16(); // bin
        let n_cigar_op = self.take_u16() as usize;
        self.take_u16(); // flag
        let l_seq = self.take_u32() as usize;
        self.take_i32(); // next_ref_id
        self.take_i32(); // next_pos
        self.take_i32(); // tlen

        if l_read_name == 0 {
            return Err(Error::BadFormat {
                reason: "zero-length read name",
                byte_or_context: String::new(),
                pos: self.pos_err(),
            });
        }
        let raw_name = self.take_bytes(l_read_name);
        let name_len = raw_name.len().saturating_sub(1); // strip NUL terminator
        let name = raw_name[..name_len].to_vec();

        self.cursor += n_cigar_op * 4; // cigar, discarded

        let packed_len = (l_seq + 1) / 2;
        let packed = self.take_bytes(packed_len).to_vec();
        let quals = self.take_bytes(l_seq).to_vec();

        let name_offset = out.len() as u32;
        out.extend_from_slice(&name);
        let sequence_offset = out.len() as u32;
        decode_packed_sequence(&packed, l_seq, out);
        let qualities_offset = out.len() as u32;
        for &q in &quals {
            if q > crate::lut::PHRED_MAX as u8 {
                return Err(Error::InvalidPhred {
                    character: q,
                    pos: self.pos_err(),
                });
            }
            out.push(q + 33);
        }

        let mut meta = RecordMeta {
            name_offset,
            name_length: name_len as u32,
            sequence_offset,
            sequence_length: l_seq as u32,
            qualities_offset,
            ..RecordMeta::empty()
        };

        self.parse_tags(block_end, &mut meta)?;
        debug_assert_eq!(self.cursor, block_end);
        let _ = record_start;
        Ok(meta)
    }

    fn parse_tags(&mut self, block_end: usize, meta: &mut RecordMeta) -> Result<(), Error> {
        while self.cursor < block_end {
            if block_end - self.cursor < 3 {
                return Err(Error::BadFormat {
                    reason: "truncated tag header",
                    byte_or_context: String::new(),
                    pos: self.pos_err(),
                });
            }
            let tag = [self.take_u8(), self.take_u8()];
            let ty = self.take_u8();
            match ty {
                b'A' => {
                    self.cursor += 1;
                }
                b'c' | b'C' => {
                    self.cursor += 1;
                }
                b's' | b'S' => {
                    self.cursor += 2;
                }
                b'i' => {
                    let v = self.take_i32();
                    if &tag == b"ch" {
                        meta.channel = v;
                    }
                }
                b'I' => {
                    self.cursor += 4;
                }
                b'f' => {
                    let v = self.take_f32();
                    if &tag == b"du" {
                        meta.duration = v;
                    }
                }
                b'Z' | b'H' => {
                    let start = self.cursor;
                    let rel = memchr::memchr(0, &self.buf.filled()[start..block_end])
                        .ok_or(Error::BadFormat {
                            reason: "unterminated Z/H tag",
                            byte_or_context: String::new(),
                            pos: self.pos_err(),
                        })?;
                    let value = &self.buf.filled()[start..start + rel];
                    if &tag == b"st" && ty == b'Z' {
                        if let Ok(s) = std::str::from_utf8(value) {
                            if let Some(epoch) = parse_iso8601_to_epoch(s) {
                                meta.start_time = epoch;
                            }
                        }
                    }
                    self.cursor = start + rel + 1;
                }
                b'B' => {
                    let subtype = self.take_u8();
                    let count = self.take_u32() as usize;
                    let elem_size = match subtype {
                        b'c' | b'C' => 1,
                        b's' | b'S' => 2,
                        b'i' | b'I' | b'f' => 4,
                        _ => {
                            return Err(Error::BadFormat {
                                reason: "unknown B-array subtype",
                                byte_or_context: format!("{:#04x}", subtype),
                                pos: self.pos_err(),
                            })
                        }
                    };
                    self.cursor += count * elem_size;
                }
                other => {
                    return Err(Error::BadFormat {
                        reason: "unknown tag type",
                        byte_or_context: format!("{:#04x}", other),
                        pos: self.pos_err(),
                    });
                }
            }
        }
        Ok(())
    }

    fn parse_available(&mut self) -> Result<(Vec<u8>, Vec<RecordMeta>), Error> {
        let mut out = Vec::new();
        let mut metas = Vec::new();
        loop {
            if !self.ensure_bytes(4)? {
                self.finished = true;
                return Ok((out, metas));
            }
            let block_size = u32::from_le_bytes(self.slice(4).try_into().unwrap()) as usize;
            if !self.ensure_bytes(4 + block_size)? {
                return Err(Error::Eof { pos: self.pos_err() });
            }
            let meta = self.parse_record(&mut out)?;
            metas.push(meta);
            self.record_index += 1;
            if self.buf.filled().len() - self.cursor < 4 {
                return Ok((out, metas));
            }
        }
    }
}

/// Decodes BAM's packed 4-bit-per-base sequence into ASCII IUPAC bytes,
/// appending to `out` (spec.md §4.1.3: "Produce the record in FASTQ
/// in-memory layout").
fn decode_packed_sequence(packed: &[u8], l_seq: usize, out: &mut Vec<u8>) {
    for i in 0..l_seq {
        let byte = packed[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        out.push(NIBBLE_TO_BASE[nibble as usize]);
    }
}

impl<S: ByteSource> Parser for BamParser<S> {
    fn next_batch(&mut self) -> Option<Result<RecordBatch, Error>> {
        if self.finished && self.buf.filled().len() - self.cursor < 4 {
            return None;
        }
        match self.parse_available() {
            Ok((_, metas)) if metas.is_empty() => None,
            Ok((bytes, metas)) => {
                let buffer: RecordBuffer = Arc::from(bytes.into_boxed_slice());
                Some(Ok(RecordBatch::new(buffer, metas)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    fn read(&mut self, n: usize) -> Option<Result<RecordBatch, Error>> {
        let mut out = Vec::new();
        let mut metas = Vec::with_capacity(n);
        while metas.len() < n {
            match self.ensure_bytes(4) {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(e) => return Some(Err(e)),
            }
            let block_size = u32::from_le_bytes(self.slice(4).try_into().unwrap()) as usize;
            match self.ensure_bytes(4 + block_size) {
                Ok(true) => {}
                Ok(false) | Err(_) => return Some(Err(Error::Eof { pos: self.pos_err() })),
            }
            match self.parse_record(&mut out) {
                Ok(meta) => {
                    metas.push(meta);
                    self.record_index += 1;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        if metas.is_empty() {
            None
        } else {
            let buffer: RecordBuffer = Arc::from(out.into_boxed_slice());
            Some(Ok(RecordBatch::new(buffer, metas)))
        }
    }
}

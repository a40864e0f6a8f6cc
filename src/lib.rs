//! A streaming quality-control analytics engine for FASTQ and BAM
//! sequencing reads.
//!
//! The engine is a single pull pipeline: a [`parser::Parser`] (either
//! [`parser::fastq::FastqParser`] or [`parser::bam::BamParser`]) reads
//! from a [`parser::ByteSource`] and hands back [`record::RecordBatch`]es;
//! each configured metric accumulator in [`metrics`] consumes those
//! batches in turn. The engine never opens files and never decompresses:
//! callers supply a `ByteSource` directly, or use
//! [`producer::ProducerSource`] to run decompression on a second thread,
//! and read the metrics back out once the stream is exhausted.
//!
//! ```no_run
//! use readstat::metrics::BaseQualityTable;
//! use readstat::parser::{FastqParser, Parser, SliceSource};
//!
//! let data = b"@read1\nACGT\n+\nIIII\n";
//! let mut parser = FastqParser::new(SliceSource::new(data));
//! let mut quality = BaseQualityTable::new();
//! while let Some(batch) = parser.next_batch() {
//!     quality.add(&mut batch.unwrap()).unwrap();
//! }
//! ```

pub mod error;
pub mod hash;
pub mod identity;
pub mod lut;
pub mod metrics;
pub mod parser;
pub mod policy;
pub mod producer;
pub mod record;
pub mod simd;
pub mod time;

pub use error::{Error, Result};
pub use parser::bam::BamParser;
pub use parser::fastq::FastqParser;
pub use parser::{IoSource, Parser, SliceSource};
pub use producer::ProducerSource;
pub use record::{RecordBatch, RecordMeta, RecordView};

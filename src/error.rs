//! Crate-wide error type.
//!
//! Follows the plain-enum + hand-written `Display`/`std::error::Error`
//! convention used throughout this crate's parser layer: no `thiserror`,
//! just a `From<io::Error>` impl and a small position helper so callers can
//! report which record an error came from.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Location of a record within a stream, used to annotate errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorPosition {
    /// 0-based index of the record within the stream.
    pub record_index: u64,
    /// Record name, if it could be recovered before the error occurred.
    pub id: Option<String>,
}

impl ErrorPosition {
    pub fn new(record_index: u64, id: Option<String>) -> Self {
        ErrorPosition { record_index, id }
    }
}

impl fmt::Display for ErrorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id.as_ref() {
            write!(f, "record '{}' (index {})", id, self.record_index)
        } else {
            write!(f, "record index {}", self.record_index)
        }
    }
}

/// All error kinds surfaced by the parsers and metric accumulators.
#[derive(Debug)]
pub enum Error {
    /// The underlying `ByteSource` reported an I/O error.
    Io(io::Error),
    /// The stream ended in the middle of a record.
    Eof { pos: ErrorPosition },
    /// A format violation: bad magic, missing `@`/`+`, length mismatch,
    /// non-ASCII byte, truncated tag, unknown tag type, etc.
    BadFormat {
        reason: &'static str,
        byte_or_context: String,
        pos: ErrorPosition,
    },
    /// A quality byte fell outside `33..=33+PHRED_MAX`.
    InvalidPhred { character: u8, pos: ErrorPosition },
    /// An illegal constructor argument (inverted thresholds, even
    /// `fragment_length`, etc).
    BadConfig(&'static str),
    /// A FASTQ record would exceed the 4 GiB implementation limit imposed
    /// by 32-bit offsets in `RecordMeta`.
    CapacityExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Eof { pos } => write!(f, "unexpected end of stream at {}", pos),
            Error::BadFormat {
                reason,
                byte_or_context,
                pos,
            } => write!(f, "format error at {}: {} ({})", pos, reason, byte_or_context),
            Error::InvalidPhred { character, pos } => {
                write!(f, "invalid Phred byte {:#04x} at {}", character, pos)
            }
            Error::BadConfig(reason) => write!(f, "invalid configuration: {}", reason),
            Error::CapacityExceeded => {
                write!(f, "record exceeds the 4 GiB implementation limit")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

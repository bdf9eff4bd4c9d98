//! Library-wide error and result types.

use std::fmt;
use std::io;

/// Result alias used throughout ctrkit.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Recoverable conditions (version mismatch, unnamed directories, leaves
/// without data) are logged through `tracing` instead of being returned.
#[derive(Debug)]
pub enum Error {
    /// A magic/signature field did not match the expected value.
    BadMagic,
    /// The format version differs from the supported one and the caller
    /// asked for strict version checking.
    UnsupportedVersion(u32),
    /// The source ended before all expected bytes could be read.
    UnexpectedEof,
    /// An offset or size would address bytes outside a view.
    InvalidRange,
    /// A structural invariant of the binary format was violated at `offset`
    /// (relative to the start of the decoded image).
    InvalidFormat { offset: u64, reason: &'static str },
    /// A node of the tree cannot be used as requested.
    InvalidNode { path: String, reason: &'static str },
    /// A section did not fit, or did not fill, the size computed for it.
    SectionOverflow {
        section: &'static str,
        limit: u64,
        requested: u64,
    },
    /// An [`crate::formats::ivfc::IvfcOptions`] value is out of range.
    InvalidOption(&'static str),
    /// An underlying I/O operation failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadMagic => write!(f, "bad magic value"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported version: {v:#010x}"),
            Error::UnexpectedEof => write!(f, "unexpected end of data"),
            Error::InvalidRange => write!(f, "invalid offset or size"),
            Error::InvalidFormat { offset, reason } => {
                write!(f, "invalid format at {offset:#x}: {reason}")
            }
            Error::InvalidNode { path, reason } => write!(f, "invalid node '{path}': {reason}"),
            Error::SectionOverflow {
                section,
                limit,
                requested,
            } => write!(
                f,
                "{section} does not match its layout: {requested:#x} bytes for {limit:#x}"
            ),
            Error::InvalidOption(s) => write!(f, "invalid option: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Error::Io(e) = self {
            Some(e)
        } else {
            None
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof
        } else {
            Error::Io(e)
        }
    }
}

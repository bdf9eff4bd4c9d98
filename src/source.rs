//! Byte-range store: shared binary sources and the views opened over them.
//!
//! A [`ByteSource`] is anything that can serve bytes at an absolute offset:
//! an in-memory buffer ([`MemorySource`]) or an open file ([`FileSource`]).
//! A [`ByteRange`] is a cheap `(source, offset, length)` window; cloning or
//! slicing it never copies data, it only bumps the reference count of the
//! shared source. The source is released when the last view over it drops.
//!
//! ```
//! use ctrkit::source::ByteRange;
//!
//! let whole = ByteRange::from_vec(b"hello world".to_vec());
//! let word = whole.slice(6, 5).unwrap();
//! assert_eq!(word.to_vec().unwrap(), b"world");
//! assert_eq!(whole.handle_count(), 2);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{Error, Result};

/// A random-access binary source shared by many views.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Read up to `buf.len()` bytes starting at absolute `offset`.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past the
    /// end of the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

/// Source backed by an owned in-memory buffer.
#[derive(Debug)]
pub struct MemorySource(Vec<u8>);

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Some(avail) = usize::try_from(offset)
            .ok()
            .and_then(|start| self.0.get(start..))
        else {
            return Ok(0);
        };
        let n = avail.len().min(buf.len());
        buf[..n].copy_from_slice(&avail[..n]);
        Ok(n)
    }
}

/// Source backed by an open file.
///
/// The length is captured when the source is created; reads are serialized
/// through an internal lock so views may be used from several threads.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let max = (self.len - offset).min(buf.len() as u64) as usize;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read(&mut buf[..max])
    }
}

/// A non-owning window of `len` bytes starting at `offset` in a shared source.
#[derive(Clone)]
pub struct ByteRange {
    source: Arc<dyn ByteSource>,
    offset: u64,
    len: u64,
}

impl ByteRange {
    /// View covering the whole of `source`.
    pub fn new(source: Arc<dyn ByteSource>) -> Self {
        let len = source.len();
        Self {
            source,
            offset: 0,
            len,
        }
    }

    /// View over an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(Arc::new(MemorySource::new(data)))
    }

    /// View over an already opened file.
    pub fn from_file(file: File) -> Result<Self> {
        Ok(Self::new(Arc::new(FileSource::new(file)?)))
    }

    /// Open `path` read-only and view the whole file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Absolute offset of this view inside its source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Open a sub-view. `offset` is relative to this view.
    ///
    /// Returns [`Error::InvalidRange`] if the sub-view would extend past the
    /// end of this one.
    pub fn slice(&self, offset: u64, len: u64) -> Result<ByteRange> {
        let end = offset.checked_add(len).ok_or(Error::InvalidRange)?;
        if end > self.len {
            return Err(Error::InvalidRange);
        }
        Ok(Self {
            source: Arc::clone(&self.source),
            offset: self.offset + offset,
            len,
        })
    }

    /// Read up to `buf.len()` bytes at `pos` (relative to this view).
    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        if pos >= self.len {
            return Ok(0);
        }
        let max = (self.len - pos).min(buf.len() as u64) as usize;
        Ok(self.source.read_at(self.offset + pos, &mut buf[..max])?)
    }

    /// Sequential reader positioned at the start of this view.
    pub fn reader(&self) -> RangeReader<'_> {
        RangeReader {
            range: self,
            pos: 0,
        }
    }

    /// Copy the whole view into memory.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.len).map_err(|_| Error::InvalidRange)?;
        let mut out = vec![0u8; len];
        self.reader().read_exact(&mut out)?;
        Ok(out)
    }

    /// Number of live views (including this one) sharing the same source.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.source)
    }

    /// Whether both views share the same backing source.
    pub fn same_source(&self, other: &ByteRange) -> bool {
        Arc::ptr_eq(&self.source, &other.source)
    }
}

impl fmt::Debug for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteRange")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

/// `Read + Seek` cursor over a [`ByteRange`]. Positions are relative to the
/// view; seeking past the end is allowed and reads there return `0`.
#[derive(Debug)]
pub struct RangeReader<'a> {
    range: &'a ByteRange,
    pos: u64,
}

impl Read for RangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .range
            .read_at(self.pos, buf)
            .map_err(|e| match e {
                Error::Io(io) => io,
                other => io::Error::other(other.to_string()),
            })?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.range.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of range")
        })?;
        Ok(self.pos)
    }
}

//! Streaming block hasher used to build the hash levels on the fly.
//!
//! A [`LevelHasher`] is a write-through [`Write`] adapter: bytes go to the
//! inner writer unchanged and, every time a block boundary is crossed, the
//! SHA-256 of that block is handed to the next [`BlockSink`]. Chaining four of
//! them (level 3 → 2 → 1 → 0) builds the whole hash tree while the file data
//! is streamed once.
//!
//! ```text
//! file data ─► LevelHasher(L3) ─digest─► LevelHasher(L2) ─digest─► LevelHasher(L1) ─digest─► FixedRegion(L0)
//!                    │                          │                          │
//!                 output                      Vec<u8>                    Vec<u8>
//! ```

use std::io::{self, Write};

use sha2::{Digest, Sha256};

use super::DIGEST_SIZE;

/// SHA-256 digest of one block.
pub type BlockHash = [u8; DIGEST_SIZE as usize];

/// Receiver of the digest of every completed block.
pub trait BlockSink {
    fn block_written(&mut self, hash: &BlockHash) -> io::Result<()>;
}

/// Collects the digests in order.
impl BlockSink for Vec<BlockHash> {
    fn block_written(&mut self, hash: &BlockHash) -> io::Result<()> {
        self.push(*hash);
        Ok(())
    }
}

/// Write-through sink hashing every `block_size` bytes written through it.
///
/// A trailing partial block is only hashed once it is completed, typically
/// with [`LevelHasher::pad_to_block`]. [`LevelHasher::into_parts`] discards
/// any pending partial block.
pub struct LevelHasher<W, S> {
    inner: W,
    next: S,
    sha: Sha256,
    block_size: u64,
    position: u64,
}

impl<W: Write, S: BlockSink> LevelHasher<W, S> {
    /// `block_size` must be non-zero.
    pub fn new(inner: W, next: S, block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            inner,
            next,
            sha: Sha256::new(),
            block_size,
            position: 0,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The sink receiving this level's digests.
    pub fn next_mut(&mut self) -> &mut S {
        &mut self.next
    }

    /// Write zeros up to the next block boundary, emitting the digest of the
    /// completed block. Does nothing on a boundary.
    pub fn pad_to_block(&mut self) -> io::Result<()> {
        let rem = self.position % self.block_size;
        if rem == 0 {
            return Ok(());
        }
        let zeros = [0u8; 0x1000];
        let mut left = self.block_size - rem;
        while left > 0 {
            let n = left.min(zeros.len() as u64) as usize;
            self.write_all(&zeros[..n])?;
            left -= n as u64;
        }
        Ok(())
    }

    pub fn into_parts(self) -> (W, S) {
        (self.inner, self.next)
    }
}

impl<W: Write, S: BlockSink> Write for LevelHasher<W, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            let in_block = self.position % self.block_size;
            let room = self.block_size - in_block;
            let take = room.min(rest.len() as u64) as usize;
            let (chunk, tail) = rest.split_at(take);

            self.inner.write_all(chunk)?;
            self.sha.update(chunk);
            self.position += take as u64;

            if take as u64 == room {
                let mut hash = [0u8; DIGEST_SIZE as usize];
                hash.copy_from_slice(&self.sha.finalize_reset());
                self.next.block_written(&hash)?;
            }
            rest = tail;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A hasher is itself a valid sink: digests are written as its data.
impl<W: Write, S: BlockSink> BlockSink for LevelHasher<W, S> {
    fn block_written(&mut self, hash: &BlockHash) -> io::Result<()> {
        self.write_all(hash)
    }
}

/// Pre-sized digest buffer for the top level. Overflowing it is an error.
#[derive(Debug)]
pub struct FixedRegion {
    buf: Vec<u8>,
    filled: usize,
}

impl FixedRegion {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            filled: 0,
        }
    }

    /// Bytes written so far.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The region, zero-filled past [`FixedRegion::filled`].
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl BlockSink for FixedRegion {
    fn block_written(&mut self, hash: &BlockHash) -> io::Result<()> {
        let end = self.filled + hash.len();
        let Some(slot) = self.buf.get_mut(self.filled..end) else {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "level 0 region is full",
            ));
        };
        slot.copy_from_slice(hash);
        self.filled = end;
        Ok(())
    }
}

//! Hash tree verification of an encoded image.

use std::io;

use tracing::{debug, warn};

use super::level::LevelHasher;
use super::{DIGEST_SIZE, IvfcHeader};
use crate::source::ByteRange;
use crate::{Error, Result};

/// A block whose digest differs from the one stored in the level above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMismatch {
    /// Level holding the block (1 to 3).
    pub level: u8,
    pub block: u64,
}

/// Outcome of [`verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub blocks_checked: u64,
    pub mismatches: Vec<BlockMismatch>,
}

impl VerifyReport {
    pub fn is_valid(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Recompute every block digest of levels 1 to 3 and compare it with the
/// stored one. Partial last blocks are hashed zero-padded.
///
/// Mismatches are collected in the report; structural problems (bad magic,
/// levels outside the image) are errors.
pub fn verify(image: &ByteRange) -> Result<VerifyReport> {
    let header = IvfcHeader::parse(&mut image.reader())?;
    check_level_sizes(&header, image.len())?;
    let [level1, level2, level3] = header.levels;

    // (level, data offset, descriptor, offset and size of the stored digests)
    let checks = [
        (3, header.level3_offset(), level3, header.level2_offset(), level2.size),
        (2, header.level2_offset(), level2, header.level1_offset(), level1.size),
        (
            1,
            header.level1_offset(),
            level1,
            header.level0_offset(),
            header.level0_size as u64,
        ),
    ];

    let mut report = VerifyReport::default();
    for (level, offset, descriptor, hashes_offset, hashes_size) in checks {
        let data = region(image, offset, descriptor.size)?;
        let stored = region(image, hashes_offset, hashes_size)?.to_vec()?;

        let mut hasher = LevelHasher::new(io::sink(), Vec::new(), descriptor.block_size());
        io::copy(&mut data.reader(), &mut hasher)?;
        hasher.pad_to_block()?;
        let (_, computed) = hasher.into_parts();

        for (block, hash) in computed.iter().enumerate() {
            report.blocks_checked += 1;
            let at = block * DIGEST_SIZE as usize;
            if stored.get(at..at + DIGEST_SIZE as usize) != Some(&hash[..]) {
                warn!(level, block, "hash mismatch");
                report.mismatches.push(BlockMismatch {
                    level,
                    block: block as u64,
                });
            }
        }
    }

    debug!(
        blocks = report.blocks_checked,
        mismatches = report.mismatches.len(),
        "verified IVFC image"
    );
    Ok(report)
}

/// Level offsets are sums of these sizes; bounding each by the image length
/// keeps that arithmetic in range.
fn check_level_sizes(header: &IvfcHeader, image_len: u64) -> Result<()> {
    for (i, level) in header.levels.iter().enumerate() {
        if level.size > image_len {
            return Err(Error::InvalidFormat {
                offset: 0x0C + 0x18 * i as u64 + 0x08,
                reason: "hash level larger than the image",
            });
        }
    }
    Ok(())
}

fn region(image: &ByteRange, offset: u64, size: u64) -> Result<ByteRange> {
    image.slice(offset, size).map_err(|_| Error::InvalidFormat {
        offset,
        reason: "hash level extends past the end of the image",
    })
}

//! IVFC - SHA-256 hash tree wrapping the 3DS RomFS filesystem.
//!
//! Found in the RomFS section of NCCH containers. Three hash levels protect
//! the filesystem data ("level 3"); each hash level holds one SHA-256 digest
//! per block of the level below. This module decodes the filesystem into a
//! [`NodeTree`] without verifying the hashes, encodes a tree back into a
//! complete image computing all hash levels, and can [`verify`] an image.
//!
//! ## Physical layout
//! ```text
//! [0x000] IVFC header                 (0x5C bytes, padded to 0x10)
//! [0x060] Level 0                     (digests of level 1 blocks)
//! [align] Level 3                     (filesystem, block aligned)
//! [align] Level 1                     (digests of level 2 blocks)
//! [align] Level 2                     (digests of level 3 blocks)
//! ```
//! Level 3 follows level 0 directly even though the header lists the levels
//! in logical order 1, 2, 3.
//!
//! ## IVFC Header
//! ```text
//! [0x00] Magic "IVFC"              (4 bytes)
//! [0x04] Version 0x00010000        (u32 LE)
//! [0x08] Level0Size                (u32 LE)
//! [0x0C] Level1 descriptor         (0x18 bytes)
//! [0x24] Level2 descriptor         (0x18 bytes)
//! [0x3C] Level3 descriptor         (0x18 bytes)
//! [0x54] HeaderSize 0x5C           (u32 LE)
//! ```
//!
//! ## Level Descriptor (0x18 bytes)
//! ```text
//! [0x00] LogicalOffset             (u64 LE)
//! [0x08] Size                      (u64 LE)
//! [0x10] BlockSizeLog2             (u32 LE)
//! [0x14] Reserved                  (u32)
//! ```
//!
//! ## Level 3 Header (0x28 bytes)
//! ```text
//! [0x00] HeaderSize 0x28           (u32 LE)
//! [0x04] DirHashTable    offset, size (2 × u32 LE)
//! [0x0C] DirInfoTable    offset, size (2 × u32 LE)
//! [0x14] FileHashTable   offset, size (2 × u32 LE)
//! [0x1C] FileInfoTable   offset, size (2 × u32 LE)
//! [0x24] FileDataOffset            (u32 LE)
//! ```
//!
//! ## Directory Entry (0x18 bytes + name)
//! ```text
//! [0x00] Parent                    (u32 LE)
//! [0x04] NextSibling               (u32 LE)
//! [0x08] FirstChildDirectory       (u32 LE)
//! [0x0C] FirstChildFile            (u32 LE)
//! [0x10] NextInHashBucket          (u32 LE)
//! [0x14] NameLength                (u32 LE)
//! [0x18] Name, UTF-16LE, padded to 4 bytes
//! ```
//!
//! ## File Entry (0x20 bytes + name)
//! ```text
//! [0x00] Parent                    (u32 LE)
//! [0x04] NextSibling               (u32 LE)
//! [0x08] DataOffset                (u64 LE, relative to FileDataOffset)
//! [0x10] DataSize                  (u64 LE)
//! [0x18] NextInHashBucket          (u32 LE)
//! [0x1C] NameLength                (u32 LE)
//! [0x20] Name, UTF-16LE, padded to 4 bytes
//! ```
//!
//! Entry offsets are relative to the start of their own table and
//! `0xFFFFFFFF` marks a missing link. The root directory is the first entry
//! of the directory table and has an empty name.

use std::io::{Read, Write};

use crate::utils::{align_up, le_u32, le_u64, magic};
use crate::{Error, Result};

pub mod decode;
pub mod encode;
pub mod layout;
pub mod level;
pub mod name_hash;
pub mod verify;

pub use decode::{decode, decode_with};
pub use encode::{FileSystemWriter, encode, encode_to_range, encode_to_vec, encode_with};
pub use layout::{FileSystemInfo, FileSystemLayout, Section};
pub use verify::{BlockMismatch, VerifyReport, verify};

#[cfg(doc)]
use crate::node::NodeTree;

pub const MAGIC: &[u8; 4] = b"IVFC";
/// The only version produced; others are read with a warning.
pub const VERSION: u32 = 0x0001_0000;
/// Value of the header size field.
pub const HEADER_SIZE: u32 = 0x5C;
/// SHA-256 digest size.
pub const DIGEST_SIZE: u64 = 0x20;
/// Marks a missing sibling, child or hash chain link.
pub const SENTINEL: u32 = 0xFFFF_FFFF;
pub const DEFAULT_BLOCK_SIZE_LOG: u32 = 12;

/// Alignment applied to the header before level 0.
const HEADER_ALIGN: u64 = 0x10;

/// Codec settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfcOptions {
    /// Log2 of the hash block size used when encoding. Accepted range 6..=24.
    pub block_size_log: u32,
    /// Fail with [`Error::UnsupportedVersion`] instead of warning when the
    /// decoded header has an unexpected version.
    pub strict_version: bool,
}

impl Default for IvfcOptions {
    fn default() -> Self {
        Self {
            block_size_log: DEFAULT_BLOCK_SIZE_LOG,
            strict_version: false,
        }
    }
}

impl IvfcOptions {
    pub fn block_size(&self) -> u64 {
        1 << self.block_size_log
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(6..=24).contains(&self.block_size_log) {
            return Err(Error::InvalidOption("block_size_log must be within 6..=24"));
        }
        Ok(())
    }
}

/// Logical placement and block size of one hash-tree level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelDescriptor {
    /// Offset as if the levels were stored in order 1, 2, 3.
    pub logical_offset: u64,
    pub size: u64,
    pub block_size_log: u32,
}

impl LevelDescriptor {
    pub fn block_size(&self) -> u64 {
        1 << self.block_size_log
    }

    fn parse<R: Read>(r: &mut R, at: u64) -> Result<Self> {
        let logical_offset = le_u64(r)?;
        let size = le_u64(r)?;
        let block_size_log = le_u32(r)?;
        let _reserved = le_u32(r)?;
        if !(1..=31).contains(&block_size_log) {
            return Err(Error::InvalidFormat {
                offset: at + 0x10,
                reason: "block size exponent out of range",
            });
        }
        Ok(Self {
            logical_offset,
            size,
            block_size_log,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.logical_offset.to_le_bytes())?;
        w.write_all(&self.size.to_le_bytes())?;
        w.write_all(&self.block_size_log.to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?;
        Ok(())
    }
}

/// Parsed IVFC header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfcHeader {
    pub version: u32,
    pub level0_size: u32,
    /// Levels 1, 2 and 3, in that order.
    pub levels: [LevelDescriptor; 3],
    pub header_size: u32,
}

impl IvfcHeader {
    /// Parse a header from `r`, which must be positioned at the magic.
    ///
    /// The version is returned as found; callers decide how to treat
    /// mismatches.
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        magic(r, MAGIC)?;
        let version = le_u32(r)?;
        let level0_size = le_u32(r)?;
        let levels = [
            LevelDescriptor::parse(r, 0x0C)?,
            LevelDescriptor::parse(r, 0x24)?,
            LevelDescriptor::parse(r, 0x3C)?,
        ];
        let header_size = le_u32(r)?;
        Ok(Self {
            version,
            level0_size,
            levels,
            header_size,
        })
    }

    /// Header for an image whose levels 0 to 3 have the given `sizes`.
    pub fn for_level_sizes(sizes: [u64; 4], block_size_log: u32) -> Result<Self> {
        let block_size = 1u64 << block_size_log;
        let level0_size = u32::try_from(sizes[0]).map_err(|_| Error::SectionOverflow {
            section: "level 0",
            limit: u32::MAX as u64,
            requested: sizes[0],
        })?;

        let mut levels = [LevelDescriptor::default(); 3];
        let mut logical_offset = 0;
        for (level, &size) in levels.iter_mut().zip(&sizes[1..]) {
            *level = LevelDescriptor {
                logical_offset,
                size,
                block_size_log,
            };
            logical_offset += align_up(size, block_size);
        }

        Ok(Self {
            version: VERSION,
            level0_size,
            levels,
            header_size: HEADER_SIZE,
        })
    }

    /// Write the header fields. The caller pads to [`IvfcHeader::level0_offset`].
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.level0_size.to_le_bytes())?;
        for level in &self.levels {
            level.write(w)?;
        }
        w.write_all(&self.header_size.to_le_bytes())?;
        Ok(())
    }

    /// The filesystem level.
    pub fn level3(&self) -> &LevelDescriptor {
        &self.levels[2]
    }

    /// Physical offset of level 0.
    pub fn level0_offset(&self) -> u64 {
        align_up(self.header_size as u64, HEADER_ALIGN)
    }

    /// Physical offset of level 3: right after level 0, block aligned.
    pub fn level3_offset(&self) -> u64 {
        let end = self.header_size as u64 + self.level0_size as u64;
        align_up(end, self.level3().block_size())
    }

    /// Physical offset of level 1: after the block-aligned level 3.
    pub fn level1_offset(&self) -> u64 {
        let level3 = self.level3();
        self.level3_offset() + align_up(level3.size, level3.block_size())
    }

    /// Physical offset of level 2: after the block-aligned level 1.
    pub fn level2_offset(&self) -> u64 {
        let level1 = &self.levels[0];
        self.level1_offset() + align_up(level1.size, level1.block_size())
    }

    /// Physical end of the image.
    pub fn image_size(&self) -> u64 {
        let level2 = &self.levels[1];
        self.level2_offset() + align_up(level2.size, level2.block_size())
    }
}

/// Parsed level 3 header: placement of the filesystem tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemHeader {
    pub header_size: u32,
    pub dir_hash: Section,
    pub dir_info: Section,
    pub file_hash: Section,
    pub file_info: Section,
    pub file_data_offset: u64,
}

impl FileSystemHeader {
    pub fn parse<R: Read>(r: &mut R) -> Result<Self> {
        let header_size = le_u32(r)?;
        let mut section = || -> Result<Section> {
            let offset = le_u32(&mut *r)? as u64;
            let size = le_u32(&mut *r)? as u64;
            Ok(Section { offset, size })
        };
        let dir_hash = section()?;
        let dir_info = section()?;
        let file_hash = section()?;
        let file_info = section()?;
        let file_data_offset = le_u32(r)? as u64;
        Ok(Self {
            header_size,
            dir_hash,
            dir_info,
            file_hash,
            file_info,
            file_data_offset,
        })
    }

    pub fn from_layout(layout: &FileSystemLayout) -> Self {
        Self {
            header_size: layout::FS_HEADER_SIZE as u32,
            dir_hash: layout.dir_hash,
            dir_info: layout.dir_info,
            file_hash: layout.file_hash,
            file_info: layout.file_info,
            file_data_offset: layout.file_data.offset,
        }
    }

    /// Write the 0x28-byte header. Fails if any field exceeds 32 bits.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let field = |section: &'static str, value: u64| -> Result<[u8; 4]> {
            u32::try_from(value)
                .map(u32::to_le_bytes)
                .map_err(|_| Error::SectionOverflow {
                    section,
                    limit: u32::MAX as u64,
                    requested: value,
                })
        };
        w.write_all(&self.header_size.to_le_bytes())?;
        for (name, s) in [
            ("directory hash table", self.dir_hash),
            ("directory info table", self.dir_info),
            ("file hash table", self.file_hash),
            ("file info table", self.file_info),
        ] {
            w.write_all(&field(name, s.offset)?)?;
            w.write_all(&field(name, s.size)?)?;
        }
        w.write_all(&field("file data", self.file_data_offset)?)?;
        Ok(())
    }
}

//! Size and offset computation for the level 3 filesystem and the hash levels.
//!
//! Everything here is derived from entry counts alone, before a single byte
//! is written: the encoder needs final offsets to fill forward links.

use super::DIGEST_SIZE;
use super::name_hash::table_length;
use crate::utils::align_up;

/// Size of the level 3 header.
pub const FS_HEADER_SIZE: u64 = 0x28;
/// Fixed part of a directory record (name follows).
pub const DIR_ENTRY_SIZE: u64 = 0x18;
/// Fixed part of a file record (name follows).
pub const FILE_ENTRY_SIZE: u64 = 0x20;
/// Size of a hash table bucket.
pub const BUCKET_SIZE: u64 = 4;
/// Alignment of names inside the info tables.
pub const NAME_ALIGN: u64 = 4;
/// Alignment of the file data section and of every file inside it.
pub const FILE_ALIGN: u64 = 0x10;

/// A contiguous region inside the level 3 data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Section {
    pub offset: u64,
    pub size: u64,
}

impl Section {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    fn after(prev: Section, size: u64) -> Self {
        Self {
            offset: prev.end(),
            size,
        }
    }
}

/// Entry counts and name/data byte totals collected from a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSystemInfo {
    /// Directory count, root included.
    pub directories: u32,
    /// Sum of directory name lengths, each aligned to [`NAME_ALIGN`].
    pub dir_names_len: u64,
    pub files: u32,
    /// Sum of file name lengths, each aligned to [`NAME_ALIGN`].
    pub file_names_len: u64,
    /// Sum of file sizes, each aligned to [`FILE_ALIGN`].
    pub file_data_len: u64,
}

impl FileSystemInfo {
    pub fn directory_buckets(&self) -> u32 {
        table_length(self.directories)
    }

    pub fn file_buckets(&self) -> u32 {
        table_length(self.files)
    }
}

/// The five sections of the level 3 data, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemLayout {
    pub dir_hash: Section,
    pub dir_info: Section,
    pub file_hash: Section,
    pub file_info: Section,
    pub file_data: Section,
}

impl FileSystemLayout {
    pub fn new(info: &FileSystemInfo) -> Self {
        let dir_hash = Section {
            offset: FS_HEADER_SIZE,
            size: BUCKET_SIZE * info.directory_buckets() as u64,
        };
        let dir_info = Section::after(
            dir_hash,
            DIR_ENTRY_SIZE * info.directories as u64 + info.dir_names_len,
        );
        let file_hash = Section::after(dir_info, BUCKET_SIZE * info.file_buckets() as u64);
        let file_info = Section::after(
            file_hash,
            FILE_ENTRY_SIZE * info.files as u64 + info.file_names_len,
        );
        let file_data = Section {
            offset: align_up(file_info.end(), FILE_ALIGN),
            size: info.file_data_len,
        };

        Self {
            dir_hash,
            dir_info,
            file_hash,
            file_info,
            file_data,
        }
    }

    /// End of the metadata tables (level 3 header included).
    pub fn metadata_end(&self) -> u64 {
        self.file_info.end()
    }

    /// Size of the whole level 3 data.
    pub fn total_size(&self) -> u64 {
        self.file_data.end()
    }
}

/// Sizes of levels 0 to 3 for a level 3 of `level3_size` bytes.
///
/// Each hash level holds one digest per block of the level below it.
pub fn level_sizes(level3_size: u64, block_size: u64) -> [u64; 4] {
    let hashes_of = |size: u64| size.div_ceil(block_size) * DIGEST_SIZE;
    let level2 = hashes_of(level3_size);
    let level1 = hashes_of(level2);
    let level0 = hashes_of(level1);
    [level0, level1, level2, level3_size]
}

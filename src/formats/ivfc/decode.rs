//! IVFC image → [`NodeTree`].
//!
//! Only level 3 is read: hash levels 0 to 2 are skipped and the hash tables
//! are not used, every entry is reached by following the sibling and child
//! links from the root directory. Leaves are views into the image source, so
//! no file data is copied.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, error, warn};

use super::layout::{DIR_ENTRY_SIZE, FILE_ENTRY_SIZE};
use super::{FileSystemHeader, IvfcHeader, IvfcOptions, SENTINEL, Section, VERSION};
use crate::node::{NodeId, NodeTree};
use crate::source::{ByteRange, RangeReader};
use crate::utils::{bytesv, le_u32, le_u64, name_from_utf16};
use crate::{Error, Result};

/// Decode the IVFC image starting at the beginning of `image`.
pub fn decode(image: &ByteRange) -> Result<NodeTree> {
    decode_with(image, &IvfcOptions::default())
}

/// Decode with explicit options. Only [`IvfcOptions::strict_version`] is
/// relevant here; block sizes are taken from the header.
pub fn decode_with(image: &ByteRange, options: &IvfcOptions) -> Result<NodeTree> {
    let header = IvfcHeader::parse(&mut image.reader())?;
    if header.version != VERSION {
        if options.strict_version {
            return Err(Error::UnsupportedVersion(header.version));
        }
        warn!(
            "unsupported IVFC version {:#010x}, expected {VERSION:#010x}",
            header.version
        );
    }

    let base = header.level3_offset();
    let level3 = image
        .slice(base, header.level3().size)
        .map_err(|_| Error::InvalidFormat {
            offset: base,
            reason: "level 3 extends past the end of the image",
        })?;
    let fs = FileSystemHeader::parse(&mut level3.reader())?;
    check_sections(&fs, level3.len(), base)?;

    let mut walker = Walker {
        level3: &level3,
        base,
        fs,
        tree: NodeTree::new(),
        seen_dirs: HashSet::new(),
        seen_files: HashSet::new(),
    };
    walker.walk()?;
    debug!(
        directories = walker.seen_dirs.len(),
        files = walker.seen_files.len(),
        "decoded IVFC filesystem"
    );
    Ok(walker.tree)
}

/// Every table named by the level 3 header must lie inside level 3.
fn check_sections(fs: &FileSystemHeader, level3_len: u64, base: u64) -> Result<()> {
    let tables = [
        (0x04, fs.dir_hash),
        (0x0C, fs.dir_info),
        (0x14, fs.file_hash),
        (0x1C, fs.file_info),
    ];
    for (field, table) in tables {
        if table.offset.checked_add(table.size).is_none_or(|end| end > level3_len) {
            return Err(Error::InvalidFormat {
                offset: base + field,
                reason: "table extends past the end of level 3",
            });
        }
    }
    if fs.file_data_offset > level3_len {
        return Err(Error::InvalidFormat {
            offset: base + 0x24,
            reason: "file data starts past the end of level 3",
        });
    }
    Ok(())
}

struct DirectoryEntry {
    offset: u32,
    next_sibling: u32,
    first_child_dir: u32,
    first_child_file: u32,
    name_len: u32,
    /// [`None`] when the name bytes are missing or not valid UTF-16.
    name: Option<String>,
}

struct FileEntry {
    offset: u32,
    next_sibling: u32,
    data_offset: u64,
    data_size: u64,
    name_len: u32,
    name: Option<String>,
}

struct Walker<'a> {
    level3: &'a ByteRange,
    /// Offset of level 3 in the image, for error reporting.
    base: u64,
    fs: FileSystemHeader,
    tree: NodeTree,
    seen_dirs: HashSet<u32>,
    seen_files: HashSet<u32>,
}

impl<'a> Walker<'a> {
    fn walk(&mut self) -> Result<()> {
        let root = self.read_dir(0)?;
        if root.name_len != 0 {
            warn!("root directory has a name, ignoring it");
        }
        if root.next_sibling != SENTINEL {
            warn!("root directory has siblings, ignoring them");
        }

        let mut pending = vec![(root, self.tree.root())];
        while let Some((entry, id)) = pending.pop() {
            self.read_files(entry.first_child_file, id)?;

            let mut children = Vec::new();
            let mut next = entry.first_child_dir;
            while next != SENTINEL {
                let dir = self.read_dir(next)?;
                next = dir.next_sibling;
                if dir.name_len == 0 {
                    error!(offset = dir.offset, "directory without name, skipping it");
                    continue;
                }
                let Some(name) = dir.name.clone() else {
                    error!(
                        offset = dir.offset,
                        "directory name cannot be read, skipping it"
                    );
                    continue;
                };
                let child = self.tree.add_container(id, &name)?;
                children.push((dir, child));
            }
            // Reversed so the first child is walked first.
            pending.extend(children.into_iter().rev());
        }
        Ok(())
    }

    fn read_files(&mut self, first: u32, parent: NodeId) -> Result<()> {
        let mut next = first;
        while next != SENTINEL {
            let file = self.read_file(next)?;
            next = file.next_sibling;
            let name = match (file.name, file.name_len) {
                (Some(name), len) if len != 0 => name,
                _ => {
                    error!(
                        offset = file.offset,
                        "file name missing or unreadable, skipping it"
                    );
                    continue;
                }
            };

            let data = file
                .data_offset
                .checked_add(self.fs.file_data_offset)
                .ok_or(Error::InvalidRange)
                .and_then(|start| self.level3.slice(start, file.data_size))
                .map_err(|_| Error::InvalidFormat {
                    offset: self.table_offset(self.fs.file_info, file.offset),
                    reason: "file data outside level 3",
                })?;
            self.tree.add_leaf(parent, &name, data)?;
        }
        Ok(())
    }

    fn read_dir(&mut self, offset: u32) -> Result<DirectoryEntry> {
        let table = self.fs.dir_info;
        if !self.seen_dirs.insert(offset) {
            return Err(Error::InvalidFormat {
                offset: self.table_offset(table, offset),
                reason: "directory entries form a cycle",
            });
        }
        let mut r = self.entry_reader(
            table,
            offset,
            DIR_ENTRY_SIZE,
            "directory entry outside its table",
        )?;

        let _parent = le_u32(&mut r)?;
        let next_sibling = le_u32(&mut r)?;
        let first_child_dir = le_u32(&mut r)?;
        let first_child_file = le_u32(&mut r)?;
        let _next_in_bucket = le_u32(&mut r)?;
        let name_len = le_u32(&mut r)?;
        let name = read_name(&mut r, table, offset as u64 + DIR_ENTRY_SIZE, name_len);

        Ok(DirectoryEntry {
            offset,
            next_sibling,
            first_child_dir,
            first_child_file,
            name_len,
            name,
        })
    }

    fn read_file(&mut self, offset: u32) -> Result<FileEntry> {
        let table = self.fs.file_info;
        if !self.seen_files.insert(offset) {
            return Err(Error::InvalidFormat {
                offset: self.table_offset(table, offset),
                reason: "file entries form a cycle",
            });
        }
        let mut r =
            self.entry_reader(table, offset, FILE_ENTRY_SIZE, "file entry outside its table")?;

        let _parent = le_u32(&mut r)?;
        let next_sibling = le_u32(&mut r)?;
        let data_offset = le_u64(&mut r)?;
        let data_size = le_u64(&mut r)?;
        let _next_in_bucket = le_u32(&mut r)?;
        let name_len = le_u32(&mut r)?;
        let name = read_name(&mut r, table, offset as u64 + FILE_ENTRY_SIZE, name_len);

        Ok(FileEntry {
            offset,
            next_sibling,
            data_offset,
            data_size,
            name_len,
            name,
        })
    }

    /// Reader positioned at the entry `offset` of `table`, after checking the
    /// fixed part of the entry fits in the table.
    fn entry_reader(
        &self,
        table: Section,
        offset: u32,
        fixed_size: u64,
        reason: &'static str,
    ) -> Result<RangeReader<'a>> {
        if offset as u64 + fixed_size > table.size {
            return Err(Error::InvalidFormat {
                offset: self.table_offset(table, offset),
                reason,
            });
        }
        let mut r = self.level3.reader();
        r.seek(SeekFrom::Start(table.offset + offset as u64))?;
        Ok(r)
    }

    fn table_offset(&self, table: Section, offset: u32) -> u64 {
        self.base + table.offset + offset as u64
    }
}

/// Read a name of `len` bytes starting `at` bytes into `table`. Names that
/// would run past the table or are not UTF-16 yield [`None`].
fn read_name<R: Read>(r: &mut R, table: Section, at: u64, len: u32) -> Option<String> {
    if len == 0 {
        return Some(String::new());
    }
    if at + len as u64 > table.size {
        return None;
    }
    let bytes = bytesv(r, len as usize).ok()?;
    name_from_utf16(&bytes)
}

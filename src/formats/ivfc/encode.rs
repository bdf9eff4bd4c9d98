//! [`NodeTree`] → IVFC image.
//!
//! Encoding takes two passes over the tree. [`FileSystemWriter::new`] counts
//! entries and name bytes to lay out every level 3 section up front; only
//! then can directory and file records be written with their final
//! offsets. The metadata tables are built in memory (prefilled with `0xFF`
//! so unset links read as [`SENTINEL`]), file data is streamed straight from
//! the leaves, and the hash levels are computed on the fly by a chain of
//! [`LevelHasher`]s.

use std::io::{self, Cursor, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use super::layout::{
    DIR_ENTRY_SIZE, FILE_ALIGN, FILE_ENTRY_SIZE, FileSystemInfo, FileSystemLayout, NAME_ALIGN,
    Section, level_sizes,
};
use super::level::{FixedRegion, LevelHasher};
use super::{FileSystemHeader, IvfcHeader, IvfcOptions, SENTINEL, name_hash};
use crate::node::{Node, NodeId, NodeTree};
use crate::source::ByteRange;
use crate::utils::{align_up, fill, utf16_name};
use crate::{Error, Result};

/// Encode `tree` as an IVFC image into `out` using default options.
///
/// Offsets are relative to the position of `out` on entry. Returns the size
/// of the image.
pub fn encode<W: Write + Seek>(tree: &NodeTree, out: &mut W) -> Result<u64> {
    encode_with(tree, out, &IvfcOptions::default())
}

/// Encode into a new in-memory buffer.
pub fn encode_to_vec(tree: &NodeTree) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    encode(tree, &mut out)?;
    Ok(out.into_inner())
}

/// Encode into a new memory-backed [`ByteRange`], ready to be decoded or
/// embedded in an outer container.
pub fn encode_to_range(tree: &NodeTree) -> Result<ByteRange> {
    Ok(ByteRange::from_vec(encode_to_vec(tree)?))
}

/// Encode `tree` into `out` with explicit options.
pub fn encode_with<W: Write + Seek>(
    tree: &NodeTree,
    out: &mut W,
    options: &IvfcOptions,
) -> Result<u64> {
    options.validate()?;
    let block_size = options.block_size();
    let base = out.stream_position()?;

    let fs = FileSystemWriter::new(tree);
    let sizes = level_sizes(fs.size(), block_size);
    let header = IvfcHeader::for_level_sizes(sizes, options.block_size_log)?;

    let mut head = Vec::with_capacity(header.level0_offset() as usize);
    header.write(&mut head)?;
    head.resize(header.level0_offset() as usize, 0);
    out.write_all(&head)?;
    // Level 0 is only known at the end; reserve it with the padding after it.
    fill(out, 0, header.level3_offset() - header.level0_offset())?;

    let level0 = FixedRegion::new(header.level0_size as usize);
    let level1 = LevelHasher::new(Vec::new(), level0, block_size);
    let level2 = LevelHasher::new(Vec::new(), level1, block_size);
    let mut level3 = LevelHasher::new(&mut *out, level2, block_size);

    fs.write(&mut level3)?;

    // Complete each level's last block before the level above pads its own.
    level3.pad_to_block()?;
    let (_, mut level2) = level3.into_parts();
    level2.pad_to_block()?;
    let (level2_data, mut level1) = level2.into_parts();
    level1.pad_to_block()?;
    let (level1_data, level0) = level1.into_parts();

    check_size("level 1", align_up(sizes[1], block_size), level1_data.len() as u64)?;
    check_size("level 2", align_up(sizes[2], block_size), level2_data.len() as u64)?;
    check_size("level 0", sizes[0], level0.filled() as u64)?;

    out.seek(SeekFrom::Start(base + header.level1_offset()))?;
    out.write_all(&level1_data)?;
    out.seek(SeekFrom::Start(base + header.level2_offset()))?;
    out.write_all(&level2_data)?;
    out.seek(SeekFrom::Start(base + header.level0_offset()))?;
    out.write_all(&level0.into_inner())?;

    let size = header.image_size();
    out.seek(SeekFrom::Start(base + size))?;
    debug!(
        directories = fs.info.directories,
        files = fs.info.files,
        size,
        "encoded IVFC image"
    );
    Ok(size)
}

fn check_size(section: &'static str, expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(Error::SectionOverflow {
            section,
            limit: expected,
            requested: actual,
        });
    }
    Ok(())
}

/// Whether a node is written as a file entry.
fn is_file(node: &Node) -> bool {
    !node.is_container() && node.data().is_some()
}

/// Level 3 writer: the filesystem tables followed by the file data.
#[derive(Debug)]
pub struct FileSystemWriter<'t> {
    tree: &'t NodeTree,
    info: FileSystemInfo,
    layout: FileSystemLayout,
}

impl<'t> FileSystemWriter<'t> {
    /// Analyze `tree` and compute the section layout.
    ///
    /// Leaves without data are logged and left out of the filesystem.
    pub fn new(tree: &'t NodeTree) -> Self {
        let info = analyze(tree);
        let layout = FileSystemLayout::new(&info);
        Self { tree, info, layout }
    }

    pub fn info(&self) -> &FileSystemInfo {
        &self.info
    }

    pub fn layout(&self) -> &FileSystemLayout {
        &self.layout
    }

    /// Size of the level 3 data.
    pub fn size(&self) -> u64 {
        self.layout.total_size()
    }

    /// Write the level 3 data to `w`. Returns the number of bytes written,
    /// always [`FileSystemWriter::size`].
    pub fn write<W: Write>(&self, w: &mut W) -> Result<u64> {
        let (metadata, files) = self.build_metadata()?;
        w.write_all(&metadata)?;
        fill(w, 0, self.layout.file_data.offset - metadata.len() as u64)?;

        let mut written = self.layout.file_data.offset;
        for id in files {
            let Some(data) = self.tree.get(id).and_then(Node::data) else {
                continue;
            };
            let copied = io::copy(&mut data.reader(), w)?;
            if copied != data.len() {
                return Err(Error::InvalidNode {
                    path: self.tree.path(id),
                    reason: "file data ended early",
                });
            }
            let padded = align_up(copied, FILE_ALIGN);
            fill(w, 0, padded - copied)?;
            written += padded;
        }

        check_size("file data", self.layout.total_size(), written)?;
        Ok(written)
    }

    /// Header and tables of level 3, plus the files in data order.
    fn build_metadata(&self) -> Result<(Vec<u8>, Vec<NodeId>)> {
        let layout = &self.layout;
        let mut buf = Vec::with_capacity(layout.metadata_end() as usize);
        FileSystemHeader::from_layout(layout).write(&mut buf)?;
        buf.resize(layout.metadata_end() as usize, 0xFF);

        let mut tables = Tables {
            tree: self.tree,
            buf,
            dir_buckets: self.info.directory_buckets(),
            file_buckets: self.info.file_buckets(),
            dir_hash: layout.dir_hash,
            file_hash: layout.file_hash,
            dir_info: SectionCursor::new("directory info table", layout.dir_info),
            file_info: SectionCursor::new("file info table", layout.file_info),
            file_data: SectionCursor::new("file data", layout.file_data),
            files: Vec::with_capacity(self.info.files as usize),
        };

        let root = self.tree.root();
        let root_offset = layout.dir_info.offset;
        tables.write_directory(root, false, true, root_offset)?;

        let mut pending = vec![(root, root_offset)];
        while let Some((dir, offset)) = pending.pop() {
            tables.write_children(dir, offset, &mut pending)?;
        }

        tables.dir_info.expect_full()?;
        tables.file_info.expect_full()?;
        tables.file_data.expect_full()?;
        Ok((tables.buf, tables.files))
    }
}

/// First pass: count entries, name bytes and file data.
fn analyze(tree: &NodeTree) -> FileSystemInfo {
    let mut info = FileSystemInfo {
        directories: 1,
        ..Default::default()
    };

    for (id, node) in tree.iter_breadth_first(tree.root()) {
        let name_len = align_up(utf16_name(node.name()).len() as u64, NAME_ALIGN);
        if node.is_container() {
            info.directories += 1;
            info.dir_names_len += name_len;
        } else if let Some(data) = node.data() {
            info.files += 1;
            info.file_names_len += name_len;
            info.file_data_len += align_up(data.len(), FILE_ALIGN);
        } else {
            warn!(
                path = %tree.path(id),
                "node is neither a directory nor a file with data, skipping it"
            );
        }
    }
    info
}

/// Write position inside one section, relative offsets included.
struct SectionCursor {
    name: &'static str,
    section: Section,
    pos: u64,
}

impl SectionCursor {
    fn new(name: &'static str, section: Section) -> Self {
        Self {
            name,
            section,
            pos: section.offset,
        }
    }

    /// Position relative to the section start, as stored in the records.
    fn relative(&self) -> u64 {
        self.pos - self.section.offset
    }

    /// Claim `len` bytes and return their absolute offset.
    fn reserve(&mut self, len: u64) -> Result<u64> {
        let at = self.pos;
        if at + len > self.section.end() {
            return Err(Error::SectionOverflow {
                section: self.name,
                limit: self.section.size,
                requested: at + len - self.section.offset,
            });
        }
        self.pos += len;
        Ok(at)
    }

    fn expect_full(&self) -> Result<()> {
        check_size(self.name, self.section.size, self.relative())
    }
}

/// Second pass state: the metadata buffer being filled.
struct Tables<'t> {
    tree: &'t NodeTree,
    buf: Vec<u8>,
    dir_buckets: u32,
    file_buckets: u32,
    dir_hash: Section,
    file_hash: Section,
    dir_info: SectionCursor,
    file_info: SectionCursor,
    file_data: SectionCursor,
    files: Vec<NodeId>,
}

impl Tables<'_> {
    fn u32_at(&self, at: u64) -> u32 {
        let at = at as usize;
        u32::from_le_bytes([
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ])
    }

    fn put(&mut self, at: u64, bytes: &[u8]) {
        let at = at as usize;
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    fn put_u32(&mut self, at: u64, value: u32) {
        self.put(at, &value.to_le_bytes());
    }

    /// Push entry `rel` on the front of the chain of `bucket` and return
    /// the previous head.
    fn link_bucket(&mut self, table: Section, bucket: u32, rel: u32) -> u32 {
        let slot = table.offset + 4 * bucket as u64;
        let head = self.u32_at(slot);
        self.put_u32(slot, rel);
        head
    }

    /// Write the files of `dir`, then its subdirectory records, queueing the
    /// subdirectories so they are expanded in order.
    fn write_children(
        &mut self,
        dir: NodeId,
        dir_offset: u64,
        pending: &mut Vec<(NodeId, u64)>,
    ) -> Result<()> {
        let tree = self.tree;
        let children = tree.children(dir);

        let files: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| tree.get(c).is_some_and(is_file))
            .collect();
        for (i, &file) in files.iter().enumerate() {
            self.write_file(file, i == 0, i + 1 == files.len(), dir_offset)?;
        }

        let dirs: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| tree.get(c).is_some_and(Node::is_container))
            .collect();
        let mut queued = Vec::with_capacity(dirs.len());
        for (i, &sub) in dirs.iter().enumerate() {
            queued.push((sub, self.dir_info.pos));
            self.write_directory(sub, i == 0, i + 1 == dirs.len(), dir_offset)?;
        }
        pending.extend(queued.into_iter().rev());
        Ok(())
    }

    fn write_directory(
        &mut self,
        id: NodeId,
        is_first: bool,
        is_last: bool,
        parent_offset: u64,
    ) -> Result<()> {
        let tree = self.tree;
        let Some(node) = tree.get(id) else {
            return Ok(());
        };
        // Only the root has no parent; its name is always empty.
        let name = match node.parent() {
            None => Vec::new(),
            Some(_) => utf16_name(node.name()),
        };
        let parent = (parent_offset - self.dir_info.section.offset) as u32;

        let record_len = DIR_ENTRY_SIZE + align_up(name.len() as u64, NAME_ALIGN);
        let at = self.dir_info.reserve(record_len)?;
        let rel = (at - self.dir_info.section.offset) as u32;
        if is_first {
            self.put_u32(parent_offset + 0x08, rel);
        }

        let bucket = name_hash::hash(parent, &name) % self.dir_buckets;
        let chain = self.link_bucket(self.dir_hash, bucket, rel);

        let mut record = Vec::with_capacity(record_len as usize);
        for field in [parent, SENTINEL, SENTINEL, SENTINEL, chain, name.len() as u32] {
            record.extend_from_slice(&field.to_le_bytes());
        }
        record.extend_from_slice(&name);
        record.resize(record_len as usize, 0);
        self.put(at, &record);

        if !is_last {
            let next = self.dir_info.relative() as u32;
            self.put_u32(at + 0x04, next);
        }
        Ok(())
    }

    fn write_file(
        &mut self,
        id: NodeId,
        is_first: bool,
        is_last: bool,
        parent_offset: u64,
    ) -> Result<()> {
        let tree = self.tree;
        let Some((node, data)) = tree.get(id).and_then(|n| n.data().map(|d| (n, d))) else {
            return Ok(());
        };
        let name = utf16_name(node.name());
        let parent = (parent_offset - self.dir_info.section.offset) as u32;

        let record_len = FILE_ENTRY_SIZE + align_up(name.len() as u64, NAME_ALIGN);
        let at = self.file_info.reserve(record_len)?;
        let rel = (at - self.file_info.section.offset) as u32;
        if is_first {
            self.put_u32(parent_offset + 0x0C, rel);
        }

        let bucket = name_hash::hash(parent, &name) % self.file_buckets;
        let chain = self.link_bucket(self.file_hash, bucket, rel);

        let data_at = self.file_data.reserve(align_up(data.len(), FILE_ALIGN))?;
        let data_offset = data_at - self.file_data.section.offset;

        let mut record = Vec::with_capacity(record_len as usize);
        record.extend_from_slice(&parent.to_le_bytes());
        record.extend_from_slice(&SENTINEL.to_le_bytes());
        record.extend_from_slice(&data_offset.to_le_bytes());
        record.extend_from_slice(&data.len().to_le_bytes());
        record.extend_from_slice(&chain.to_le_bytes());
        record.extend_from_slice(&(name.len() as u32).to_le_bytes());
        record.extend_from_slice(&name);
        record.resize(record_len as usize, 0);
        self.put(at, &record);

        if !is_last {
            let next = self.file_info.relative() as u32;
            self.put_u32(at + 0x04, next);
        }
        self.files.push(id);
        Ok(())
    }
}

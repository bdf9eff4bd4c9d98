mod common;

use std::fs;
use std::io::{Seek, SeekFrom, Write};

use common::{capture_logs, leaf, listing, sample_tree};
use ctrkit::Error;
use ctrkit::formats::ivfc::{
    self, BlockMismatch, IvfcHeader, IvfcOptions, decode, decode_with, encode, encode_to_range,
    encode_to_vec, encode_with, verify,
};
use ctrkit::node::NodeTree;
use ctrkit::source::ByteRange;
use tempfile::NamedTempFile;
use tracing::Level;

#[test]
fn reencoding_a_decoded_image_is_byte_identical() {
    let first = encode_to_vec(&sample_tree()).unwrap();

    let ((), logs) = capture_logs(|| {
        let tree = decode(&ByteRange::from_vec(first.clone())).unwrap();
        let second = encode_to_vec(&tree).unwrap();
        assert!(first == second, "re-encoded image differs");
    });
    assert!(logs.problems().is_empty(), "{:?}", logs.problems());
}

#[test]
fn decoded_tree_matches_the_encoded_one() {
    let tree = sample_tree();
    let image = encode_to_range(&tree).unwrap();
    let decoded = decode(&image).unwrap();

    let mut expected = listing(&tree);
    let mut actual = listing(&decoded);
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);
    assert!(decoded.find("empty_dir").is_some());
    let empty = decoded.find("empty.bin").unwrap();
    let empty_data = decoded.get(empty).unwrap().data().unwrap();
    assert!(empty_data.is_empty());
}

#[test]
fn single_file_in_a_directory() {
    let mut tree = NodeTree::new();
    let docs = tree.add_container(tree.root(), "docs").unwrap();
    tree.add_leaf(docs, "a.txt", leaf(b"test")).unwrap();

    let image = encode_to_vec(&tree).unwrap();
    assert_eq!(&image[..4], b"IVFC");
    let header = IvfcHeader::parse(&mut image.as_slice()).unwrap();
    assert_eq!(header.level3().size, 0xC0);
    assert_eq!(image.len(), 0x4000);

    let decoded = decode(&ByteRange::from_vec(image)).unwrap();
    let root_children = decoded.children(decoded.root());
    assert_eq!(root_children.len(), 1);
    let docs = decoded.get(root_children[0]).unwrap();
    assert_eq!(docs.name(), "docs");
    assert!(docs.is_container());

    let file = decoded.get(docs.children()[0]).unwrap();
    assert_eq!(file.name(), "a.txt");
    assert_eq!(file.data().unwrap().to_vec().unwrap(), [0x74, 0x65, 0x73, 0x74]);
}

#[test]
fn empty_tree_round_trips() {
    let tree = NodeTree::new();
    let image = encode_to_vec(&tree).unwrap();
    let decoded = decode(&ByteRange::from_vec(image.clone())).unwrap();
    assert!(decoded.children(decoded.root()).is_empty());
    assert_eq!(encode_to_vec(&decoded).unwrap(), image);
}

#[test]
fn decoding_releases_every_handle() {
    let image = encode_to_range(&sample_tree()).unwrap();
    assert_eq!(image.handle_count(), 1);

    let tree = decode(&image).unwrap();
    assert!(image.handle_count() > 1);
    let reencoded = encode_to_vec(&tree).unwrap();
    drop(tree);

    assert_eq!(image.handle_count(), 1);
    assert_eq!(reencoded, image.to_vec().unwrap());
}

#[test]
fn failed_decode_releases_every_handle() {
    let mut bytes = encode_to_vec(&sample_tree()).unwrap();
    bytes[..4].copy_from_slice(b"IVFX");
    let image = ByteRange::from_vec(bytes);

    assert!(matches!(decode(&image), Err(Error::BadMagic)));
    assert_eq!(image.handle_count(), 1);
}

#[test]
fn file_backed_image_round_trip() {
    let mut input = NamedTempFile::new().unwrap();
    let size = encode(&sample_tree(), input.as_file_mut()).unwrap();
    input.flush().unwrap();
    assert_eq!(fs::metadata(input.path()).unwrap().len(), size);

    let image = ByteRange::open(input.path()).unwrap();
    let tree = decode(&image).unwrap();

    let mut output = NamedTempFile::new().unwrap();
    encode(&tree, output.as_file_mut()).unwrap();
    drop(tree);

    assert_eq!(fs::read(input.path()).unwrap(), fs::read(output.path()).unwrap());
    assert_eq!(image.handle_count(), 1);
}

#[test]
fn decoded_leaves_can_be_mixed_with_new_ones() {
    let image = encode_to_range(&sample_tree()).unwrap();
    let mut tree = decode(&image).unwrap();

    let readme = tree.find("readme.txt").unwrap();
    tree.remove(readme).unwrap();
    let data = tree.find("data").unwrap();
    tree.add_leaf(data, "patch.txt", leaf(b"patched")).unwrap();

    let patched = decode(&encode_to_range(&tree).unwrap()).unwrap();
    assert!(patched.find("readme.txt").is_none());
    let patch = patched.get(patched.find("data/patch.txt").unwrap()).unwrap();
    assert_eq!(patch.data().unwrap().to_vec().unwrap(), b"patched");
    let big = patched.find("data/deep/deeper/big.bin").unwrap();
    assert_eq!(patched.get(big).unwrap().data().unwrap().len(), 0x3456);
}

#[test]
fn many_files_in_one_directory() {
    let mut tree = NodeTree::new();
    let dir = tree.add_container(tree.root(), "many").unwrap();
    for i in 0..100 {
        let name = format!("file_{i:03}.dat");
        tree.add_leaf(dir, &name, leaf(name.as_bytes())).unwrap();
    }

    let image = encode_to_vec(&tree).unwrap();
    let decoded = decode(&ByteRange::from_vec(image.clone())).unwrap();
    let many = decoded.find("many").unwrap();
    assert_eq!(decoded.children(many).len(), 100);
    let last = decoded.find("many/file_099.dat").unwrap();
    assert_eq!(
        decoded.get(last).unwrap().data().unwrap().to_vec().unwrap(),
        b"file_099.dat"
    );
    assert_eq!(encode_to_vec(&decoded).unwrap(), image);
}

#[test]
fn version_mismatch_is_logged() {
    let mut bytes = encode_to_vec(&sample_tree()).unwrap();
    bytes[4..8].copy_from_slice(&0x0002_0000u32.to_le_bytes());
    let image = ByteRange::from_vec(bytes);

    let (tree, logs) = capture_logs(|| decode(&image));
    assert!(tree.is_ok());
    assert!(logs.contains(Level::WARN, "unsupported IVFC version"));

    let strict = IvfcOptions {
        strict_version: true,
        ..Default::default()
    };
    assert!(matches!(
        decode_with(&image, &strict),
        Err(Error::UnsupportedVersion(0x0002_0000))
    ));
}

#[test]
fn leaf_without_data_is_logged_and_dropped() {
    let mut tree = sample_tree();
    let ghost = tree.add_leaf(tree.root(), "ghost", leaf(b"boo")).unwrap();
    tree.get_mut(ghost).unwrap().take_data();

    let (image, logs) = capture_logs(|| encode_to_vec(&tree).unwrap());
    assert!(logs.contains(Level::WARN, "neither a directory nor a file"));
    assert_eq!(image, encode_to_vec(&sample_tree()).unwrap());
}

#[test]
fn encoding_into_a_larger_stream() {
    let mut out = std::io::Cursor::new(Vec::new());
    out.write_all(&[0xCC; 0x200]).unwrap();
    let size = encode(&sample_tree(), &mut out).unwrap();
    assert_eq!(out.stream_position().unwrap(), 0x200 + size);

    let whole = ByteRange::from_vec(out.into_inner());
    let image = whole.slice(0x200, size).unwrap();
    assert!(verify(&image).unwrap().is_valid());
    assert_eq!(decode(&image).unwrap().len(), sample_tree().len());
}

#[test]
fn smaller_block_size() {
    let options = IvfcOptions {
        block_size_log: 9,
        ..Default::default()
    };
    let mut out = std::io::Cursor::new(Vec::new());
    encode_with(&sample_tree(), &mut out, &options).unwrap();
    let bytes = out.into_inner();
    assert_eq!(bytes.len() % 0x200, 0);

    let header = IvfcHeader::parse(&mut bytes.as_slice()).unwrap();
    assert!(header.levels.iter().all(|l| l.block_size_log == 9));
    assert_eq!(header.level3_offset(), 0x200);

    let image = ByteRange::from_vec(bytes);
    assert!(verify(&image).unwrap().is_valid());
    let mut expected = listing(&sample_tree());
    let mut actual = listing(&decode(&image).unwrap());
    expected.sort();
    actual.sort();
    assert_eq!(actual, expected);
}

#[test]
fn verification_pinpoints_corruption() {
    let mut bytes = encode_to_vec(&sample_tree()).unwrap();
    let header = IvfcHeader::parse(&mut bytes.as_slice()).unwrap();
    assert!(verify(&ByteRange::from_vec(bytes.clone())).unwrap().is_valid());

    // Flip a byte in the third level 3 block and in the level 2 digests.
    bytes[(header.level3_offset() + 0x2005) as usize] ^= 0x80;
    bytes[(header.level2_offset() + 0x40) as usize] ^= 0x01;

    let (report, logs) = capture_logs(|| verify(&ByteRange::from_vec(bytes)).unwrap());
    assert!(!report.is_valid());
    assert_eq!(
        report.mismatches,
        [
            BlockMismatch { level: 3, block: 2 },
            BlockMismatch { level: 2, block: 0 },
        ]
    );
    assert!(logs.contains(Level::WARN, "hash mismatch"));
}

#[test]
fn truncated_image_is_rejected() {
    let bytes = encode_to_vec(&sample_tree()).unwrap();
    let image = ByteRange::from_vec(bytes[..0x40].to_vec());
    assert!(matches!(decode(&image), Err(Error::UnexpectedEof)));
}

#[test]
fn encoding_to_a_file_at_an_offset() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"prefix").unwrap();
    let size = ivfc::encode(&sample_tree(), file.as_file_mut()).unwrap();
    file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();

    let whole = ByteRange::from_file(file.reopen().unwrap()).unwrap();
    assert_eq!(whole.len(), 6 + size);
    let image = whole.slice(6, size).unwrap();
    assert!(verify(&image).unwrap().is_valid());
}

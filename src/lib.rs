//! **ctrkit** - a Rust library for reading and writing 3DS RomFS images.
//!
//! A RomFS image is an IVFC hash tree wrapping a small hashed filesystem.
//! ctrkit decodes an image into an in-memory [`node::NodeTree`] whose files
//! are views into the image, and encodes any tree back into a byte-exact
//! image with all hash levels computed.
//!
//! # Modules
//! | Module | Contents |
//! |--------|----------|
//! | [`source`] | [`source::ByteRange`] - shareable view over a file or buffer |
//! | [`node`] | [`node::NodeTree`] - directories and files with data views |
//! | [`formats::ivfc`] | IVFC / RomFS decoder, encoder and verifier |
//!
//! ```no_run
//! use ctrkit::formats::ivfc;
//! use ctrkit::source::ByteRange;
//!
//! # fn main() -> ctrkit::Result<()> {
//! let image = ByteRange::open("romfs.bin")?;
//! let mut tree = ivfc::decode(&image)?;
//! let root = tree.root();
//! tree.add_leaf(root, "patch.txt", ByteRange::from_vec(b"hello".to_vec()))?;
//! let mut out = std::fs::File::create("romfs.new.bin")?;
//! ivfc::encode(&tree, &mut out)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod formats;
pub mod node;
pub mod source;
pub mod utils;

pub use error::{Error, Result};

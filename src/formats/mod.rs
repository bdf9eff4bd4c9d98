//! Codecs for Nintendo 3DS binary formats.
//!
//! Codecs follow the same conventions:
//!
//! * **Views, not copies** - decoding builds a [`crate::node::NodeTree`]
//!   whose leaves are [`crate::source::ByteRange`] slices of the input.
//!   File data is only read when a consumer reads it.
//! * **Streaming output** - encoders write to any [`std::io::Write`] +
//!   [`std::io::Seek`] sink in a single pass over the file data.
//! * **Log, don't fail** - recoverable oddities in the input are reported
//!   through `tracing` and skipped; only structural damage is an error.
//!
//! ## Format overview
//!
//! | Module   | Format       | Description |
//! |----------|--------------|-------------|
//! | [`ivfc`] | IVFC / RomFS | SHA-256 hash tree over a hashed directory and file table |

pub mod ivfc;

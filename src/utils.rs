//! Low-level I/O primitives shared by the codecs.
//!
//! Each read function consumes exactly the bytes it promises or returns an
//! error - there is no partial-read ambiguity.

use std::io::{Read, Write};

use crate::{Error, Result};

/// Read a little-endian `u32`.
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Read a little-endian `u64`.
#[inline]
pub(crate) fn le_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Read exactly `len` bytes into a `Vec`.
#[inline]
pub(crate) fn bytesv<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut b = vec![0u8; len];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Verify that the next `N` bytes in the stream match `expected`.
///
/// Returns [`Error::BadMagic`] on mismatch.
#[inline]
pub(crate) fn magic<R: Read, const N: usize>(r: &mut R, expected: &[u8; N]) -> Result<()> {
    let mut got = [0u8; N];
    r.read_exact(&mut got)?;
    if &got != expected {
        return Err(Error::BadMagic);
    }
    Ok(())
}

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Write `count` copies of `byte`.
pub(crate) fn fill<W: Write>(w: &mut W, byte: u8, mut count: u64) -> Result<()> {
    let chunk = [byte; 0x1000];
    while count > 0 {
        let n = count.min(chunk.len() as u64) as usize;
        w.write_all(&chunk[..n])?;
        count -= n as u64;
    }
    Ok(())
}

/// Encode an entry name the way the filesystem tables store it: UTF-16LE
/// without terminator.
pub(crate) fn utf16_name(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode a UTF-16LE entry name. Returns [`None`] for odd lengths or
/// unpaired surrogates.
pub(crate) fn name_from_utf16(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 0x10), 0);
        assert_eq!(align_up(1, 0x10), 0x10);
        assert_eq!(align_up(0x10, 0x10), 0x10);
        assert_eq!(align_up(0x5C, 0x1000), 0x1000);
    }

    #[test]
    fn utf16_names_survive_the_table_encoding() {
        let bytes = utf16_name("a.txt");
        assert_eq!(bytes, b"a\0.\0t\0x\0t\0");
        assert_eq!(name_from_utf16(&bytes).as_deref(), Some("a.txt"));
        assert_eq!(name_from_utf16(&bytes[..3]), None);
    }

    #[test]
    fn fill_writes_exact_count() {
        let mut out = Vec::new();
        fill(&mut out, 0xFF, 0x1003).unwrap();
        assert_eq!(out.len(), 0x1003);
        assert!(out.iter().all(|&b| b == 0xFF));
    }
}

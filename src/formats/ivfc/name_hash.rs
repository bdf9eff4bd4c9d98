//! Name lookup hash used by the directory and file hash tables.
//!
//! Both functions must match the values Nintendo's tooling produces, so
//! their quirks are kept as-is: the table length is only "roughly prime".

/// Number of buckets of a hash table holding `entries` entries.
///
/// * fewer than 3 entries: 3 buckets.
/// * fewer than 19: the count forced to odd (15 stays 15).
/// * otherwise: the first value not divisible by any prime up to 17.
pub fn table_length(entries: u32) -> u32 {
    if entries < 3 {
        return 3;
    }
    if entries < 19 {
        return entries | 1;
    }

    const SIEVE: [u32; 7] = [2, 3, 5, 7, 11, 13, 17];
    let mut count = entries;
    while SIEVE.iter().any(|p| count % p == 0) {
        count += 1;
    }
    count
}

/// Hash of a UTF-16LE encoded `name` seeded with the entry's parent offset.
///
/// # Panics
/// Panics if `name` has an odd length: names are always whole UTF-16 code
/// units.
pub fn hash(seed: u32, name: &[u8]) -> u32 {
    assert!(name.len() % 2 == 0, "entry names are UTF-16 code units");

    let mut h = seed ^ 123_456_789;
    for unit in name.chunks_exact(2) {
        h = h.rotate_right(5);
        h ^= u16::from_le_bytes([unit[0], unit[1]]) as u32;
    }
    h
}

/// Bucket of `name` in a table sized for `entries` entries.
pub fn bucket(seed: u32, name: &[u8], entries: u32) -> u32 {
    hash(seed, name) % table_length(entries)
}

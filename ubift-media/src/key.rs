//! The 64-bit UBIFS key space.
//!
//! A key packs a 32-bit host inode number, a 3-bit type tag, and a 29-bit
//! payload into eight little-endian bytes. The payload is the r5 name hash
//! for directory and extended-attribute entries, the 4 KiB block index for
//! data nodes, and zero for inode nodes. Keys order lexicographically on
//! `(inode, type, payload)`, which is exactly the order the wandering tree
//! stores them in.

use crate::ParseError;

/// Bytes a key occupies on disk inside a branch.
pub const KEY_SIZE: usize = 8;

/// Bytes reserved for a key inside node headers (only the first 8 are used).
pub const NODE_KEY_BYTES: usize = 16;

/// Mask selecting the 29 payload bits.
const PAYLOAD_MASK: u32 = 0x1fff_ffff;

/// Key type tag, stored in the top three bits of the second word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeyType {
    /// Inode node key; payload is zero.
    Ino = 0,
    /// Data node key; payload is the 4 KiB block index.
    Data = 1,
    /// Directory entry key; payload is the r5 hash of the name.
    Dent = 2,
    /// Extended attribute entry key; payload is the r5 hash of the name.
    Xent = 3,
}

impl TryFrom<u8> for KeyType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ino),
            1 => Ok(Self::Data),
            2 => Ok(Self::Dent),
            3 => Ok(Self::Xent),
            other => Err(ParseError::UnknownKeyType(other)),
        }
    }
}

/// A decoded UBIFS key.
///
/// The derived ordering is the lexicographic `(inum, kind, payload)` order
/// the index relies on; field order here is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    /// Host inode number.
    pub inum: u32,
    /// Key type tag.
    pub kind: KeyType,
    /// 29-bit payload (hash, block index, or zero).
    pub payload: u32,
}

impl Key {
    /// Builds a key from its parts. The payload is masked to 29 bits.
    #[must_use]
    pub fn new(inum: u32, kind: KeyType, payload: u32) -> Self {
        Self { inum, kind, payload: payload & PAYLOAD_MASK }
    }

    /// The key of an inode node.
    #[must_use]
    pub fn ino(inum: u32) -> Self {
        Self::new(inum, KeyType::Ino, 0)
    }

    /// The key of a data node for the given 4 KiB block.
    #[must_use]
    pub fn data(inum: u32, block: u32) -> Self {
        Self::new(inum, KeyType::Data, block)
    }

    /// The key of a directory entry under `parent` with the given name.
    #[must_use]
    pub fn dent(parent: u32, name: &[u8]) -> Self {
        Self::new(parent, KeyType::Dent, r5_hash(name))
    }

    /// The key of an extended-attribute entry on `host` with the given name.
    #[must_use]
    pub fn xent(host: u32, name: &[u8]) -> Self {
        Self::new(host, KeyType::Xent, r5_hash(name))
    }

    /// Decodes a key from its first eight on-disk bytes.
    pub fn parse(raw: &[u8]) -> crate::Result<Self> {
        if raw.len() < KEY_SIZE {
            return Err(ParseError::Truncated { offset: 0, need: KEY_SIZE, have: raw.len() });
        }
        let inum = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let word = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        let kind = KeyType::try_from((word >> 29) as u8)?;
        Ok(Self { inum, kind, payload: word & PAYLOAD_MASK })
    }

    /// Encodes the key to its eight on-disk bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; KEY_SIZE] {
        let mut out = [0u8; KEY_SIZE];
        out[..4].copy_from_slice(&self.inum.to_le_bytes());
        let word = (u32::from(self.kind as u8) << 29) | (self.payload & PAYLOAD_MASK);
        out[4..].copy_from_slice(&word.to_le_bytes());
        out
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:?}, {:#x})", self.inum, self.kind, self.payload)
    }
}

/// The r5 name hash used in directory and extended-attribute keys.
///
/// Values 0 and 1 are reserved for `.` and `..` and 2 for the end-of-readdir
/// marker, so accumulators at or below 2 shift up by 3; only the low 29 bits
/// of the result are kept.
#[must_use]
pub fn r5_hash(name: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in name {
        hash = hash
            .wrapping_add(u32::from(b) << 4)
            .wrapping_add(u32::from(b) >> 4)
            .wrapping_mul(11);
    }
    if hash <= 2 {
        hash += 3;
    }
    hash & PAYLOAD_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_bytes() {
        let key = Key::new(0x0102_0304, KeyType::Dent, 0x1234_5678 & 0x1fff_ffff);
        assert_eq!(Key::parse(&key.to_bytes()), Ok(key));
    }

    #[test]
    fn key_ordering_is_lexicographic() {
        assert!(Key::data(100, 7) < Key::data(100, 8));
        assert!(Key::data(100, 0) < Key::new(100, KeyType::Dent, 0));
        assert!(Key::new(99, KeyType::Xent, 0x1fff_ffff) < Key::ino(100));
        assert!(Key::ino(5) < Key::data(5, 0));
    }

    #[test]
    fn r5_reserves_low_values() {
        assert_eq!(r5_hash(b""), 3);
        assert!(r5_hash(b".") > 2);
        assert!(r5_hash(b"..") > 2);
    }

    #[test]
    fn r5_is_deterministic_and_masked() {
        let a = r5_hash(b"0914_2023-03-01T114645+0100_6EE37D_000C.pud");
        assert_eq!(a, r5_hash(b"0914_2023-03-01T114645+0100_6EE37D_000C.pud"));
        assert!(a <= 0x1fff_ffff);
    }

    #[test]
    fn unknown_key_type_is_rejected() {
        // Type bits 0b101 (5) are outside the known set.
        let mut raw = Key::ino(1).to_bytes();
        raw[7] |= 0b1010_0000;
        assert!(matches!(Key::parse(&raw), Err(ParseError::UnknownKeyType(5))));
    }
}

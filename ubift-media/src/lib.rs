//! On-disk vocabulary of UBI and UBIFS.
//!
//! This crate holds bit-exact codecs for every structure the ubift engine
//! reads off a raw NAND image: the UBI erase-counter and volume-id headers,
//! the volume table, and the full UBIFS node family. UBI headers are
//! big-endian, UBIFS nodes are little-endian; both layers checksum with the
//! same CRC-32 variant (initial `0xFFFF_FFFF`, no final xor).
//!
//! Parsers take `(buffer, offset)` and return typed structures. Nodes with
//! flexible trailing arrays (directory-entry names, inline inode data,
//! compressed data payloads, index branch arrays) borrow slices of the
//! caller's buffer instead of copying: the image buffer is the database.

mod bytes;
pub mod key;
pub mod node;
pub mod ubi;

pub use key::{Key, KeyType, r5_hash};
pub use node::{
    Branch, CommonHeader, CompressionType, CsNode, DataNode, DentNode, IdxNode, InoNode,
    InodeType, MstNode, Node, NodeType, OrphNode, PadNode, RefNode, SbNode, TrunNode,
    parse_node, seal_node,
};
pub use ubi::{EcHeader, VidHeader, VtblRecord};

/// Result type for media parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors produced while decoding on-disk structures.
///
/// These are deliberately small and local: callers skip the offending
/// header or node and keep going.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A read would run past the end of the buffer.
    #[error("truncated structure at offset {offset}: need {need} bytes, {have} available")]
    Truncated {
        /// Offset of the structure being parsed.
        offset: usize,
        /// Bytes the structure requires.
        need: usize,
        /// Bytes actually available from `offset`.
        have: usize,
    },

    /// A magic number did not match.
    #[error("bad magic at offset {offset}: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// Offset of the magic field.
        offset: usize,
        /// The magic the structure must carry.
        expected: u32,
        /// The value actually present.
        found: u32,
    },

    /// A node's `ch.len` is smaller than its fixed-size prefix.
    #[error("node length {len} below minimum {min}")]
    BadLength {
        /// Declared total length.
        len: u32,
        /// Minimum length for this node type.
        min: u32,
    },

    /// A flexible-array length field exceeds the space `ch.len` grants.
    #[error("flexible array of {len} bytes exceeds the {available} bytes the node length allows")]
    BadFlexLength {
        /// Bytes the length field claims.
        len: usize,
        /// Bytes available inside the node.
        available: usize,
    },

    /// A data node declares more than one block of decompressed payload.
    #[error("data node declares {size} decompressed bytes (block size is 4096)")]
    OversizedData {
        /// Declared decompressed size.
        size: u32,
    },

    /// A key carries a type tag outside the known set.
    #[error("unknown key type {0}")]
    UnknownKeyType(u8),
}

/// CRC-32 as used by both UBI and UBIFS.
///
/// The kernel seeds with `0xFFFF_FFFF` and skips the final inversion, which
/// is the bitwise complement of the IEEE checksum `crc32fast` computes.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    !crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // JAMCRC("123456789") per the canonical CRC catalogue.
        assert_eq!(crc32(b"123456789"), 0x340b_c6d9);
    }

    #[test]
    fn crc32_of_empty_is_all_ones() {
        assert_eq!(crc32(b""), 0xffff_ffff);
    }
}

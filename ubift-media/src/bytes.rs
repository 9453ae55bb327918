//! Bounded scalar reads and writes at explicit byte offsets.

use crate::ParseError;

/// Returns `len` bytes at `offset`, or [`ParseError::Truncated`].
pub(crate) fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    buf.get(offset..offset.saturating_add(len))
        .ok_or(ParseError::Truncated {
            offset,
            need: len,
            have: buf.len().saturating_sub(offset),
        })
}

/// Reads a `u8` at `offset`.
pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(take(buf, offset, 1)?[0])
}

macro_rules! scalar_readers {
    ($($le:ident, $be:ident => $ty:ty),* $(,)?) => {
        $(
            /// Reads a little-endian scalar at `offset`.
            pub(crate) fn $le(buf: &[u8], offset: usize) -> Result<$ty, ParseError> {
                let raw = take(buf, offset, size_of::<$ty>())?;
                let mut arr = [0u8; size_of::<$ty>()];
                arr.copy_from_slice(raw);
                Ok(<$ty>::from_le_bytes(arr))
            }

            /// Reads a big-endian scalar at `offset`.
            pub(crate) fn $be(buf: &[u8], offset: usize) -> Result<$ty, ParseError> {
                let raw = take(buf, offset, size_of::<$ty>())?;
                let mut arr = [0u8; size_of::<$ty>()];
                arr.copy_from_slice(raw);
                Ok(<$ty>::from_be_bytes(arr))
            }
        )*
    };
}

scalar_readers! {
    read_le16, read_be16 => u16,
    read_le32, read_be32 => u32,
    read_le64, read_be64 => u64,
}

/// Writes a `u8` at `offset`. The buffer must be large enough.
pub(crate) fn write_u8(buf: &mut [u8], offset: usize, val: u8) {
    buf[offset] = val;
}

macro_rules! scalar_writers {
    ($($le:ident, $be:ident => $ty:ty),* $(,)?) => {
        $(
            /// Writes a little-endian scalar at `offset`.
            pub(crate) fn $le(buf: &mut [u8], offset: usize, val: $ty) {
                buf[offset..offset + size_of::<$ty>()].copy_from_slice(&val.to_le_bytes());
            }

            /// Writes a big-endian scalar at `offset`.
            pub(crate) fn $be(buf: &mut [u8], offset: usize, val: $ty) {
                buf[offset..offset + size_of::<$ty>()].copy_from_slice(&val.to_be_bytes());
            }
        )*
    };
}

scalar_writers! {
    write_le16, write_be16 => u16,
    write_le32, write_be32 => u32,
    write_le64, write_be64 => u64,
}

/// Copies a fixed-size array out of `buf` at `offset`.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let raw = take(buf, offset, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(raw);
    Ok(arr)
}

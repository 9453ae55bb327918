//! UBI on-flash headers: erase counter, volume identifier, volume table.
//!
//! All multi-byte fields are big-endian. Every header ends in a CRC-32 over
//! the bytes that precede it. Layouts mirror the kernel's `ubi-media.h`:
//!
//! | structure | size | magic |
//! |-----------|------|-------|
//! | erase-counter header | 64 | `UBI#` |
//! | volume-id header | 64 | `UBI!` |
//! | volume-table record | 172 | — |

use crate::{ParseError, bytes, crc32};

/// Magic of the erase-counter header (`UBI#`).
pub const UBI_EC_HDR_MAGIC: u32 = 0x5542_4923;
/// The erase-counter magic as it appears in the byte stream.
pub const UBI_EC_HDR_MAGIC_BYTES: [u8; 4] = *b"UBI#";
/// Magic of the volume-id header (`UBI!`).
pub const UBI_VID_HDR_MAGIC: u32 = 0x5542_4921;

/// Size of an erase-counter header.
pub const UBI_EC_HDR_SIZE: usize = 64;
/// Size of a volume-id header.
pub const UBI_VID_HDR_SIZE: usize = 64;
/// Size of one volume-table record.
pub const UBI_VTBL_RECORD_SIZE: usize = 172;

/// Volume id of the internal layout volume holding the volume table.
pub const UBI_LAYOUT_VOLUME_ID: u32 = 0x7fff_efff;
/// Maximum number of user volumes (and volume-table slots).
pub const UBI_MAX_VOLUMES: usize = 128;
/// Maximum volume name length in a volume-table record.
pub const UBI_VOL_NAME_MAX: usize = 127;

/// Dynamic volume type tag.
pub const UBI_VID_DYNAMIC: u8 = 1;
/// Static volume type tag.
pub const UBI_VID_STATIC: u8 = 2;

/// Erase-counter header, present at offset 0 of every UBI PEB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcHeader {
    /// UBI version (1).
    pub version: u8,
    /// Erase count of this PEB.
    pub ec: u64,
    /// Byte offset of the volume-id header inside the PEB.
    pub vid_hdr_offset: u32,
    /// Byte offset of the LEB data area inside the PEB.
    pub data_offset: u32,
    /// Image sequence number shared by all PEBs of one UBI image.
    pub image_seq: u32,
    /// Stored CRC-32 over the first 60 header bytes.
    pub hdr_crc: u32,
}

impl EcHeader {
    /// Parses an erase-counter header at `offset`, validating the magic.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let raw = bytes::take(buf, offset, UBI_EC_HDR_SIZE)?;
        let magic = bytes::read_be32(raw, 0)?;
        if magic != UBI_EC_HDR_MAGIC {
            return Err(ParseError::BadMagic { offset, expected: UBI_EC_HDR_MAGIC, found: magic });
        }
        Ok(Self {
            version: bytes::read_u8(raw, 4)?,
            ec: bytes::read_be64(raw, 8)?,
            vid_hdr_offset: bytes::read_be32(raw, 16)?,
            data_offset: bytes::read_be32(raw, 20)?,
            image_seq: bytes::read_be32(raw, 24)?,
            hdr_crc: bytes::read_be32(raw, 60)?,
        })
    }

    /// Packs the header back to its 64 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; UBI_EC_HDR_SIZE] {
        let mut out = [0u8; UBI_EC_HDR_SIZE];
        bytes::write_be32(&mut out, 0, UBI_EC_HDR_MAGIC);
        bytes::write_u8(&mut out, 4, self.version);
        bytes::write_be64(&mut out, 8, self.ec);
        bytes::write_be32(&mut out, 16, self.vid_hdr_offset);
        bytes::write_be32(&mut out, 20, self.data_offset);
        bytes::write_be32(&mut out, 24, self.image_seq);
        bytes::write_be32(&mut out, 60, self.hdr_crc);
        out
    }

    /// Whether the stored CRC matches the header contents.
    #[must_use]
    pub fn hdr_crc_ok(&self) -> bool {
        self.hdr_crc == crc32(&self.to_bytes()[..UBI_EC_HDR_SIZE - 4])
    }

    /// Computes and stores the header CRC. Used when assembling images.
    pub fn seal(&mut self) {
        self.hdr_crc = crc32(&self.to_bytes()[..UBI_EC_HDR_SIZE - 4]);
    }
}

/// Volume-id header, mapping a PEB to `(vol_id, lnum)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidHeader {
    /// UBI version (1).
    pub version: u8,
    /// Volume type (dynamic or static).
    pub vol_type: u8,
    /// Set while wear-leveling copies this PEB.
    pub copy_flag: u8,
    /// Compatibility flags of internal volumes.
    pub compat: u8,
    /// Volume this PEB belongs to.
    pub vol_id: u32,
    /// Logical erase block number inside the volume.
    pub lnum: u32,
    /// Bytes of used data (static volumes only).
    pub data_size: u32,
    /// Total LEBs of a static volume.
    pub used_ebs: u32,
    /// Bytes unused at the end of the data area.
    pub data_pad: u32,
    /// CRC of the data area (static volumes only).
    pub data_crc: u32,
    /// Global sequence number; higher supersedes lower for one `(vol_id, lnum)`.
    pub sqnum: u64,
    /// Stored CRC-32 over the first 60 header bytes.
    pub hdr_crc: u32,
}

impl VidHeader {
    /// Parses a volume-id header at `offset`, validating the magic.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let raw = bytes::take(buf, offset, UBI_VID_HDR_SIZE)?;
        let magic = bytes::read_be32(raw, 0)?;
        if magic != UBI_VID_HDR_MAGIC {
            return Err(ParseError::BadMagic { offset, expected: UBI_VID_HDR_MAGIC, found: magic });
        }
        Ok(Self {
            version: bytes::read_u8(raw, 4)?,
            vol_type: bytes::read_u8(raw, 5)?,
            copy_flag: bytes::read_u8(raw, 6)?,
            compat: bytes::read_u8(raw, 7)?,
            vol_id: bytes::read_be32(raw, 8)?,
            lnum: bytes::read_be32(raw, 12)?,
            data_size: bytes::read_be32(raw, 20)?,
            used_ebs: bytes::read_be32(raw, 24)?,
            data_pad: bytes::read_be32(raw, 28)?,
            data_crc: bytes::read_be32(raw, 32)?,
            sqnum: bytes::read_be64(raw, 40)?,
            hdr_crc: bytes::read_be32(raw, 60)?,
        })
    }

    /// Packs the header back to its 64 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; UBI_VID_HDR_SIZE] {
        let mut out = [0u8; UBI_VID_HDR_SIZE];
        bytes::write_be32(&mut out, 0, UBI_VID_HDR_MAGIC);
        bytes::write_u8(&mut out, 4, self.version);
        bytes::write_u8(&mut out, 5, self.vol_type);
        bytes::write_u8(&mut out, 6, self.copy_flag);
        bytes::write_u8(&mut out, 7, self.compat);
        bytes::write_be32(&mut out, 8, self.vol_id);
        bytes::write_be32(&mut out, 12, self.lnum);
        bytes::write_be32(&mut out, 20, self.data_size);
        bytes::write_be32(&mut out, 24, self.used_ebs);
        bytes::write_be32(&mut out, 28, self.data_pad);
        bytes::write_be32(&mut out, 32, self.data_crc);
        bytes::write_be64(&mut out, 40, self.sqnum);
        bytes::write_be32(&mut out, 60, self.hdr_crc);
        out
    }

    /// Whether the stored CRC matches the header contents.
    #[must_use]
    pub fn hdr_crc_ok(&self) -> bool {
        self.hdr_crc == crc32(&self.to_bytes()[..UBI_VID_HDR_SIZE - 4])
    }

    /// Computes and stores the header CRC. Used when assembling images.
    pub fn seal(&mut self) {
        self.hdr_crc = crc32(&self.to_bytes()[..UBI_VID_HDR_SIZE - 4]);
    }
}

/// One record of the volume table kept in the layout volume.
///
/// A slot describes the volume whose id equals the slot index; a slot with
/// `reserved_pebs == 0` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtblRecord {
    /// PEBs reserved for this volume; zero marks an empty slot.
    pub reserved_pebs: u32,
    /// LEB alignment of the volume.
    pub alignment: u32,
    /// Bytes unused at the end of each LEB to satisfy alignment.
    pub data_pad: u32,
    /// Volume type (dynamic or static).
    pub vol_type: u8,
    /// Set while a volume update is in flight.
    pub upd_marker: u8,
    /// Length of the name in bytes.
    pub name_len: u16,
    /// Fixed-size name buffer, NUL-padded.
    pub name: [u8; UBI_VOL_NAME_MAX + 1],
    /// Volume flags.
    pub flags: u8,
    /// Stored CRC-32 over the first 168 record bytes.
    pub crc: u32,
}

impl VtblRecord {
    /// Parses a volume-table record at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let raw = bytes::take(buf, offset, UBI_VTBL_RECORD_SIZE)?;
        Ok(Self {
            reserved_pebs: bytes::read_be32(raw, 0)?,
            alignment: bytes::read_be32(raw, 4)?,
            data_pad: bytes::read_be32(raw, 8)?,
            vol_type: bytes::read_u8(raw, 12)?,
            upd_marker: bytes::read_u8(raw, 13)?,
            name_len: bytes::read_be16(raw, 14)?,
            name: bytes::read_array::<{ UBI_VOL_NAME_MAX + 1 }>(raw, 16)?,
            flags: bytes::read_u8(raw, 144)?,
            crc: bytes::read_be32(raw, 168)?,
        })
    }

    /// Packs the record back to its 172 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; UBI_VTBL_RECORD_SIZE] {
        let mut out = [0u8; UBI_VTBL_RECORD_SIZE];
        bytes::write_be32(&mut out, 0, self.reserved_pebs);
        bytes::write_be32(&mut out, 4, self.alignment);
        bytes::write_be32(&mut out, 8, self.data_pad);
        bytes::write_u8(&mut out, 12, self.vol_type);
        bytes::write_u8(&mut out, 13, self.upd_marker);
        bytes::write_be16(&mut out, 14, self.name_len);
        out[16..144].copy_from_slice(&self.name);
        bytes::write_u8(&mut out, 144, self.flags);
        bytes::write_be32(&mut out, 168, self.crc);
        out
    }

    /// Whether the stored CRC matches the record contents.
    #[must_use]
    pub fn crc_ok(&self) -> bool {
        self.crc == crc32(&self.to_bytes()[..UBI_VTBL_RECORD_SIZE - 4])
    }

    /// Computes and stores the record CRC. Used when assembling images.
    pub fn seal(&mut self) {
        self.crc = crc32(&self.to_bytes()[..UBI_VTBL_RECORD_SIZE - 4]);
    }

    /// The volume name, decoded lossily from the name buffer.
    #[must_use]
    pub fn name(&self) -> String {
        let len = usize::from(self.name_len).min(self.name.len());
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    /// Whether this slot describes a volume at all.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.reserved_pebs > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ec() -> EcHeader {
        let mut ec = EcHeader {
            version: 1,
            ec: 42,
            vid_hdr_offset: 2048,
            data_offset: 4096,
            image_seq: 0xdead_beef,
            hdr_crc: 0,
        };
        ec.seal();
        ec
    }

    #[test]
    fn ec_header_round_trips() {
        let ec = sample_ec();
        let raw = ec.to_bytes();
        let back = EcHeader::parse(&raw, 0).unwrap();
        assert_eq!(back, ec);
        assert_eq!(back.to_bytes(), raw);
        assert!(back.hdr_crc_ok());
    }

    #[test]
    fn ec_header_rejects_wrong_magic() {
        let mut raw = sample_ec().to_bytes();
        raw[0] = b'X';
        assert!(matches!(EcHeader::parse(&raw, 0), Err(ParseError::BadMagic { .. })));
    }

    #[test]
    fn corrupt_ec_header_fails_crc() {
        let mut raw = sample_ec().to_bytes();
        raw[9] ^= 0xff;
        assert!(!EcHeader::parse(&raw, 0).unwrap().hdr_crc_ok());
    }

    #[test]
    fn vid_header_round_trips() {
        let mut vid = VidHeader {
            version: 1,
            vol_type: UBI_VID_DYNAMIC,
            copy_flag: 0,
            compat: 0,
            vol_id: 3,
            lnum: 17,
            data_size: 0,
            used_ebs: 0,
            data_pad: 0,
            data_crc: 0,
            sqnum: 99,
            hdr_crc: 0,
        };
        vid.seal();
        let raw = vid.to_bytes();
        let back = VidHeader::parse(&raw, 0).unwrap();
        assert_eq!(back, vid);
        assert_eq!(back.to_bytes(), raw);
        assert!(back.hdr_crc_ok());
    }

    #[test]
    fn vtbl_record_round_trips_and_names() {
        let mut name = [0u8; UBI_VOL_NAME_MAX + 1];
        name[..5].copy_from_slice(b"linux");
        let mut rec = VtblRecord {
            reserved_pebs: 5,
            alignment: 1,
            data_pad: 0,
            vol_type: UBI_VID_DYNAMIC,
            upd_marker: 0,
            name_len: 5,
            name,
            flags: 0,
            crc: 0,
        };
        rec.seal();
        let raw = rec.to_bytes();
        let back = VtblRecord::parse(&raw, 0).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.to_bytes(), raw);
        assert!(back.crc_ok());
        assert_eq!(back.name(), "linux");
        assert!(back.in_use());
    }
}

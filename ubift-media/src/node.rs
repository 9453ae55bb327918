//! The UBIFS node family.
//!
//! Every node starts with a 24-byte common header (magic `0x06101831`,
//! little-endian) whose `len` field bounds all trailing reads and whose CRC
//! covers bytes `[8, len)`. Layouts mirror the kernel's `ubifs-media.h` bit
//! for bit:
//!
//! | node | fixed size | flexible tail |
//! |------|-----------:|---------------|
//! | INO  | 160 | inline data (`data_len`) |
//! | DATA | 48  | compressed payload (`len - 48`) |
//! | DENT / XENT | 56 | name (`nlen`) |
//! | TRUN | 56  | — |
//! | PAD  | 28  | `pad_len` dead bytes follow |
//! | SB   | 4096 | — |
//! | MST  | 512 | — |
//! | REF  | 64  | — |
//! | IDX  | 28  | `child_cnt` branches of 20 bytes |
//! | CS   | 32  | — |
//! | ORPH | 32  | inode numbers (8 bytes each) |

use crate::key::{Key, NODE_KEY_BYTES};
use crate::{ParseError, bytes, crc32};

/// Magic of the common header (`0x06101831`).
pub const UBIFS_NODE_MAGIC: u32 = 0x0610_1831;
/// The node magic as it appears in the byte stream (little-endian).
pub const UBIFS_NODE_MAGIC_BYTES: [u8; 4] = [0x31, 0x18, 0x10, 0x06];

/// Size of the common header.
pub const UBIFS_CH_SIZE: usize = 24;
/// Fixed size of an inode node.
pub const UBIFS_INO_NODE_SIZE: usize = 160;
/// Fixed size of a data node.
pub const UBIFS_DATA_NODE_SIZE: usize = 48;
/// Fixed size of a directory-entry (and extended-attribute) node.
pub const UBIFS_DENT_NODE_SIZE: usize = 56;
/// Size of a truncation node.
pub const UBIFS_TRUN_NODE_SIZE: usize = 56;
/// Size of a padding node.
pub const UBIFS_PAD_NODE_SIZE: usize = 28;
/// Size of the superblock node.
pub const UBIFS_SB_NODE_SIZE: usize = 4096;
/// Size of a master node.
pub const UBIFS_MST_NODE_SIZE: usize = 512;
/// Size of a log-reference node.
pub const UBIFS_REF_NODE_SIZE: usize = 64;
/// Fixed size of an index node (header plus counts).
pub const UBIFS_IDX_NODE_SIZE: usize = 28;
/// Size of a commit-start node.
pub const UBIFS_CS_NODE_SIZE: usize = 32;
/// Fixed size of an orphan node.
pub const UBIFS_ORPH_NODE_SIZE: usize = 32;
/// Size of one index branch carrying an 8-byte key.
pub const UBIFS_BRANCH_SIZE: usize = 20;

/// Decompressed size of one data block.
pub const UBIFS_BLOCK_SIZE: usize = 4096;

/// Hash buffer length in superblock and master nodes.
const HASH_LEN: usize = 64;
/// HMAC buffer length in superblock and master nodes.
const HMAC_LEN: usize = 64;

/// Node type tag in the common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeType {
    /// Inode node.
    Ino = 0,
    /// Data node.
    Data = 1,
    /// Directory entry node.
    Dent = 2,
    /// Extended attribute entry node (DENT layout).
    Xent = 3,
    /// Truncation node.
    Trun = 4,
    /// Padding node.
    Pad = 5,
    /// Superblock node.
    Sb = 6,
    /// Master node.
    Mst = 7,
    /// Log reference node.
    Ref = 8,
    /// Index node.
    Idx = 9,
    /// Commit start node.
    Cs = 10,
    /// Orphan node.
    Orph = 11,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ino,
            1 => Self::Data,
            2 => Self::Dent,
            3 => Self::Xent,
            4 => Self::Trun,
            5 => Self::Pad,
            6 => Self::Sb,
            7 => Self::Mst,
            8 => Self::Ref,
            9 => Self::Idx,
            10 => Self::Cs,
            11 => Self::Orph,
            other => return Err(other),
        })
    }
}

/// Inode type as recorded in directory entries and inode modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InodeType {
    /// Regular file.
    Reg = 0,
    /// Directory.
    Dir = 1,
    /// Symbolic link.
    Lnk = 2,
    /// Block device node.
    Blk = 3,
    /// Character device node.
    Chr = 4,
    /// Named pipe.
    Fifo = 5,
    /// Socket.
    Sock = 6,
}

impl TryFrom<u8> for InodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Reg,
            1 => Self::Dir,
            2 => Self::Lnk,
            3 => Self::Blk,
            4 => Self::Chr,
            5 => Self::Fifo,
            6 => Self::Sock,
            other => return Err(other),
        })
    }
}

/// On-the-fly compression scheme of inode and data payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CompressionType {
    /// Stored uncompressed.
    None = 0,
    /// LZO1X.
    Lzo = 1,
    /// Raw DEFLATE (zlib with negative window bits).
    Zlib = 2,
    /// Zstandard.
    Zstd = 3,
}

impl TryFrom<u16> for CompressionType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Lzo,
            2 => Self::Zlib,
            3 => Self::Zstd,
            other => return Err(other),
        })
    }
}

/// The 24-byte header every UBIFS node starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    /// Stored CRC-32 over bytes `[8, len)` of the node.
    pub crc: u32,
    /// Global sequence number of the node.
    pub sqnum: u64,
    /// Total node length including this header.
    pub len: u32,
    /// Raw node type tag.
    pub node_type: u8,
    /// Group type tag.
    pub group_type: u8,
    /// Whether the stored CRC matched the buffer at parse time.
    ///
    /// Derived at parse time, never serialized.
    pub crc_ok: bool,
}

impl CommonHeader {
    /// A header for a freshly assembled node; `len` and `crc` are filled in
    /// by [`seal_node`].
    #[must_use]
    pub fn new(node_type: NodeType, sqnum: u64) -> Self {
        Self { crc: 0, sqnum, len: 0, node_type: node_type as u8, group_type: 0, crc_ok: true }
    }

    /// Parses a common header at `offset`, validating the magic and checking
    /// the CRC against the buffer when `len` is in bounds.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let raw = bytes::take(buf, offset, UBIFS_CH_SIZE)?;
        let magic = bytes::read_le32(raw, 0)?;
        if magic != UBIFS_NODE_MAGIC {
            return Err(ParseError::BadMagic { offset, expected: UBIFS_NODE_MAGIC, found: magic });
        }
        let crc = bytes::read_le32(raw, 4)?;
        let len = bytes::read_le32(raw, 16)?;
        let span = len as usize;
        let crc_ok = span >= UBIFS_CH_SIZE
            && offset + span <= buf.len()
            && crc == crc32(&buf[offset + 8..offset + span]);
        Ok(Self {
            crc,
            sqnum: bytes::read_le64(raw, 8)?,
            len,
            node_type: bytes::read_u8(raw, 20)?,
            group_type: bytes::read_u8(raw, 21)?,
            crc_ok,
        })
    }

    /// The decoded node type, if the tag is a known one.
    #[must_use]
    pub fn kind(&self) -> Option<NodeType> {
        NodeType::try_from(self.node_type).ok()
    }

    /// Writes the 24 header bytes at the start of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        bytes::write_le32(buf, 0, UBIFS_NODE_MAGIC);
        bytes::write_le32(buf, 4, self.crc);
        bytes::write_le64(buf, 8, self.sqnum);
        bytes::write_le32(buf, 16, self.len);
        bytes::write_u8(buf, 20, self.node_type);
        bytes::write_u8(buf, 21, self.group_type);
    }

    /// Packs the header to its 24 on-disk bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; UBIFS_CH_SIZE] {
        let mut out = [0u8; UBIFS_CH_SIZE];
        self.write_to(&mut out);
        out
    }
}

/// Stamps `len` and `crc` of a fully assembled node buffer.
///
/// The buffer must start with a written common header; its total length
/// becomes `ch.len` and the CRC is computed over bytes `[8, len)`.
pub fn seal_node(node: &mut [u8]) {
    let len = u32::try_from(node.len()).unwrap_or(u32::MAX);
    bytes::write_le32(node, 16, len);
    let crc = crc32(&node[8..]);
    bytes::write_le32(node, 4, crc);
}

/// Reads the 8 meaningful bytes of a 16-byte node key field.
fn parse_node_key(raw: &[u8], offset: usize) -> crate::Result<Key> {
    Key::parse(bytes::take(raw, offset, NODE_KEY_BYTES)?)
}

/// Checks `ch.len` against a node's fixed size and returns the node slice.
fn node_slice<'a>(buf: &'a [u8], offset: usize, ch: &CommonHeader, min: usize) -> crate::Result<&'a [u8]> {
    let len = ch.len as usize;
    if len < min {
        return Err(ParseError::BadLength { len: ch.len, min: min as u32 });
    }
    bytes::take(buf, offset, len)
}

/// Superblock node, at offset 0 of LEB 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Type of hash function used for keys.
    pub key_hash: u8,
    /// Key format.
    pub key_fmt: u8,
    /// Filesystem flags.
    pub flags: u32,
    /// Minimal I/O unit size.
    pub min_io_size: u32,
    /// Logical erase block size.
    pub leb_size: u32,
    /// Count of LEBs the filesystem occupies.
    pub leb_cnt: u32,
    /// Maximum count of LEBs the filesystem may grow to.
    pub max_leb_cnt: u32,
    /// Maximum journal size in bytes.
    pub max_bud_bytes: u64,
    /// LEBs of the journal log area.
    pub log_lebs: u32,
    /// LEBs of the LEB-properties tree area.
    pub lpt_lebs: u32,
    /// LEBs of the orphan area.
    pub orph_lebs: u32,
    /// Count of journal heads.
    pub jhead_cnt: u32,
    /// Index tree fanout.
    pub fanout: u32,
    /// Size of the LEB-number save table.
    pub lsave_cnt: u32,
    /// On-flash format version.
    pub fmt_version: u32,
    /// Default compression type.
    pub default_compr: u16,
    /// Reserved-pool owner uid.
    pub rp_uid: u32,
    /// Reserved-pool owner gid.
    pub rp_gid: u32,
    /// Reserved-pool size in bytes.
    pub rp_size: u64,
    /// Time granularity in nanoseconds.
    pub time_gran: u32,
    /// Filesystem UUID.
    pub uuid: [u8; 16],
    /// Read-only compatibility version.
    pub ro_compat_version: u32,
    /// Superblock HMAC (authenticated filesystems).
    pub hmac: [u8; HMAC_LEN],
    /// HMAC of a well-known message (authenticated filesystems).
    pub hmac_wkm: [u8; HMAC_LEN],
    /// Hash algorithm (authenticated filesystems).
    pub hash_algo: u16,
    /// Expected master-node hash (authenticated filesystems).
    pub hash_mst: [u8; HASH_LEN],
}

impl SbNode {
    /// Parses a superblock node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_SB_NODE_SIZE)?;
        Ok(Self {
            ch,
            key_hash: bytes::read_u8(raw, 26)?,
            key_fmt: bytes::read_u8(raw, 27)?,
            flags: bytes::read_le32(raw, 28)?,
            min_io_size: bytes::read_le32(raw, 32)?,
            leb_size: bytes::read_le32(raw, 36)?,
            leb_cnt: bytes::read_le32(raw, 40)?,
            max_leb_cnt: bytes::read_le32(raw, 44)?,
            max_bud_bytes: bytes::read_le64(raw, 48)?,
            log_lebs: bytes::read_le32(raw, 56)?,
            lpt_lebs: bytes::read_le32(raw, 60)?,
            orph_lebs: bytes::read_le32(raw, 64)?,
            jhead_cnt: bytes::read_le32(raw, 68)?,
            fanout: bytes::read_le32(raw, 72)?,
            lsave_cnt: bytes::read_le32(raw, 76)?,
            fmt_version: bytes::read_le32(raw, 80)?,
            default_compr: bytes::read_le16(raw, 84)?,
            rp_uid: bytes::read_le32(raw, 88)?,
            rp_gid: bytes::read_le32(raw, 92)?,
            rp_size: bytes::read_le64(raw, 96)?,
            time_gran: bytes::read_le32(raw, 104)?,
            uuid: bytes::read_array::<16>(raw, 108)?,
            ro_compat_version: bytes::read_le32(raw, 124)?,
            hmac: bytes::read_array::<HMAC_LEN>(raw, 128)?,
            hmac_wkm: bytes::read_array::<HMAC_LEN>(raw, 192)?,
            hash_algo: bytes::read_le16(raw, 256)?,
            hash_mst: bytes::read_array::<HASH_LEN>(raw, 258)?,
        })
    }

    /// Packs the node to its 4096 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_SB_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_u8(&mut out, 26, self.key_hash);
        bytes::write_u8(&mut out, 27, self.key_fmt);
        bytes::write_le32(&mut out, 28, self.flags);
        bytes::write_le32(&mut out, 32, self.min_io_size);
        bytes::write_le32(&mut out, 36, self.leb_size);
        bytes::write_le32(&mut out, 40, self.leb_cnt);
        bytes::write_le32(&mut out, 44, self.max_leb_cnt);
        bytes::write_le64(&mut out, 48, self.max_bud_bytes);
        bytes::write_le32(&mut out, 56, self.log_lebs);
        bytes::write_le32(&mut out, 60, self.lpt_lebs);
        bytes::write_le32(&mut out, 64, self.orph_lebs);
        bytes::write_le32(&mut out, 68, self.jhead_cnt);
        bytes::write_le32(&mut out, 72, self.fanout);
        bytes::write_le32(&mut out, 76, self.lsave_cnt);
        bytes::write_le32(&mut out, 80, self.fmt_version);
        bytes::write_le16(&mut out, 84, self.default_compr);
        bytes::write_le32(&mut out, 88, self.rp_uid);
        bytes::write_le32(&mut out, 92, self.rp_gid);
        bytes::write_le64(&mut out, 96, self.rp_size);
        bytes::write_le32(&mut out, 104, self.time_gran);
        out[108..124].copy_from_slice(&self.uuid);
        bytes::write_le32(&mut out, 124, self.ro_compat_version);
        out[128..192].copy_from_slice(&self.hmac);
        out[192..256].copy_from_slice(&self.hmac_wkm);
        bytes::write_le16(&mut out, 256, self.hash_algo);
        out[258..322].copy_from_slice(&self.hash_mst);
        out
    }
}

/// Master node; redundant copies accumulate in LEBs 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MstNode {
    /// Common header; `sqnum` decides which copy is the active one.
    pub ch: CommonHeader,
    /// Highest inode number ever used.
    pub highest_inum: u64,
    /// Commit number.
    pub cmt_no: u64,
    /// Master flags.
    pub flags: u32,
    /// LEB of the journal log head.
    pub log_lnum: u32,
    /// LEB holding the root index node.
    pub root_lnum: u32,
    /// Offset of the root index node.
    pub root_offs: u32,
    /// Length of the root index node.
    pub root_len: u32,
    /// LEB reserved for garbage collection.
    pub gc_lnum: u32,
    /// LEB of the index head.
    pub ihead_lnum: u32,
    /// Offset of the index head.
    pub ihead_offs: u32,
    /// Size of the index in bytes.
    pub index_size: u64,
    /// Free space accounted by the master.
    pub total_free: u64,
    /// Dirty space accounted by the master.
    pub total_dirty: u64,
    /// Used space accounted by the master.
    pub total_used: u64,
    /// Dead space accounted by the master.
    pub total_dead: u64,
    /// Dark space accounted by the master.
    pub total_dark: u64,
    /// LEB of the LEB-properties tree root.
    pub lpt_lnum: u32,
    /// Offset of the LEB-properties tree root.
    pub lpt_offs: u32,
    /// LEB of the LPT head.
    pub nhead_lnum: u32,
    /// Offset of the LPT head.
    pub nhead_offs: u32,
    /// LEB of the LPT table.
    pub ltab_lnum: u32,
    /// Offset of the LPT table.
    pub ltab_offs: u32,
    /// LEB of the LEB-number save table.
    pub lsave_lnum: u32,
    /// Offset of the LEB-number save table.
    pub lsave_offs: u32,
    /// LEB last scanned for free space.
    pub lscan_lnum: u32,
    /// Count of empty LEBs.
    pub empty_lebs: u32,
    /// Count of LEBs holding index nodes.
    pub idx_lebs: u32,
    /// Count of LEBs of the filesystem.
    pub leb_cnt: u32,
    /// Hash of the root index node (authenticated filesystems).
    pub hash_root_idx: [u8; HASH_LEN],
    /// Hash of the LPT (authenticated filesystems).
    pub hash_lpt: [u8; HASH_LEN],
    /// Master HMAC (authenticated filesystems).
    pub hmac: [u8; HMAC_LEN],
}

impl MstNode {
    /// Parses a master node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_MST_NODE_SIZE)?;
        Ok(Self {
            ch,
            highest_inum: bytes::read_le64(raw, 24)?,
            cmt_no: bytes::read_le64(raw, 32)?,
            flags: bytes::read_le32(raw, 40)?,
            log_lnum: bytes::read_le32(raw, 44)?,
            root_lnum: bytes::read_le32(raw, 48)?,
            root_offs: bytes::read_le32(raw, 52)?,
            root_len: bytes::read_le32(raw, 56)?,
            gc_lnum: bytes::read_le32(raw, 60)?,
            ihead_lnum: bytes::read_le32(raw, 64)?,
            ihead_offs: bytes::read_le32(raw, 68)?,
            index_size: bytes::read_le64(raw, 72)?,
            total_free: bytes::read_le64(raw, 80)?,
            total_dirty: bytes::read_le64(raw, 88)?,
            total_used: bytes::read_le64(raw, 96)?,
            total_dead: bytes::read_le64(raw, 104)?,
            total_dark: bytes::read_le64(raw, 112)?,
            lpt_lnum: bytes::read_le32(raw, 120)?,
            lpt_offs: bytes::read_le32(raw, 124)?,
            nhead_lnum: bytes::read_le32(raw, 128)?,
            nhead_offs: bytes::read_le32(raw, 132)?,
            ltab_lnum: bytes::read_le32(raw, 136)?,
            ltab_offs: bytes::read_le32(raw, 140)?,
            lsave_lnum: bytes::read_le32(raw, 144)?,
            lsave_offs: bytes::read_le32(raw, 148)?,
            lscan_lnum: bytes::read_le32(raw, 152)?,
            empty_lebs: bytes::read_le32(raw, 156)?,
            idx_lebs: bytes::read_le32(raw, 160)?,
            leb_cnt: bytes::read_le32(raw, 164)?,
            hash_root_idx: bytes::read_array::<HASH_LEN>(raw, 168)?,
            hash_lpt: bytes::read_array::<HASH_LEN>(raw, 232)?,
            hmac: bytes::read_array::<HMAC_LEN>(raw, 296)?,
        })
    }

    /// Packs the node to its 512 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_MST_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le64(&mut out, 24, self.highest_inum);
        bytes::write_le64(&mut out, 32, self.cmt_no);
        bytes::write_le32(&mut out, 40, self.flags);
        bytes::write_le32(&mut out, 44, self.log_lnum);
        bytes::write_le32(&mut out, 48, self.root_lnum);
        bytes::write_le32(&mut out, 52, self.root_offs);
        bytes::write_le32(&mut out, 56, self.root_len);
        bytes::write_le32(&mut out, 60, self.gc_lnum);
        bytes::write_le32(&mut out, 64, self.ihead_lnum);
        bytes::write_le32(&mut out, 68, self.ihead_offs);
        bytes::write_le64(&mut out, 72, self.index_size);
        bytes::write_le64(&mut out, 80, self.total_free);
        bytes::write_le64(&mut out, 88, self.total_dirty);
        bytes::write_le64(&mut out, 96, self.total_used);
        bytes::write_le64(&mut out, 104, self.total_dead);
        bytes::write_le64(&mut out, 112, self.total_dark);
        bytes::write_le32(&mut out, 120, self.lpt_lnum);
        bytes::write_le32(&mut out, 124, self.lpt_offs);
        bytes::write_le32(&mut out, 128, self.nhead_lnum);
        bytes::write_le32(&mut out, 132, self.nhead_offs);
        bytes::write_le32(&mut out, 136, self.ltab_lnum);
        bytes::write_le32(&mut out, 140, self.ltab_offs);
        bytes::write_le32(&mut out, 144, self.lsave_lnum);
        bytes::write_le32(&mut out, 148, self.lsave_offs);
        bytes::write_le32(&mut out, 152, self.lscan_lnum);
        bytes::write_le32(&mut out, 156, self.empty_lebs);
        bytes::write_le32(&mut out, 160, self.idx_lebs);
        bytes::write_le32(&mut out, 164, self.leb_cnt);
        out[168..232].copy_from_slice(&self.hash_root_idx);
        out[232..296].copy_from_slice(&self.hash_lpt);
        out[296..360].copy_from_slice(&self.hmac);
        out
    }
}

/// Inode node. Inline data carries symlink targets and small xattr values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InoNode<'a> {
    /// Common header.
    pub ch: CommonHeader,
    /// Inode key.
    pub key: Key,
    /// Sequence number at creation time.
    pub creat_sqnum: u64,
    /// Inode size in bytes.
    pub size: u64,
    /// Access time, seconds.
    pub atime_sec: u64,
    /// Change time, seconds.
    pub ctime_sec: u64,
    /// Modification time, seconds.
    pub mtime_sec: u64,
    /// Access time, nanoseconds.
    pub atime_nsec: u32,
    /// Change time, nanoseconds.
    pub ctime_nsec: u32,
    /// Modification time, nanoseconds.
    pub mtime_nsec: u32,
    /// Link count; zero means the inode is deleted.
    pub nlink: u32,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
    /// POSIX mode bits.
    pub mode: u32,
    /// Inode flags.
    pub flags: u32,
    /// Length of the inline data.
    pub data_len: u32,
    /// Count of extended attributes.
    pub xattr_cnt: u32,
    /// Total size of extended attribute values.
    pub xattr_size: u32,
    /// Total length of extended attribute names.
    pub xattr_names: u32,
    /// Compression type of data nodes belonging to this inode.
    pub compr_type: u16,
    /// Inline data, borrowed from the image buffer.
    pub data: &'a [u8],
}

impl<'a> InoNode<'a> {
    /// Parses an inode node at `offset`.
    pub fn parse(buf: &'a [u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_INO_NODE_SIZE)?;
        let data_len = bytes::read_le32(raw, 112)?;
        let available = raw.len() - UBIFS_INO_NODE_SIZE;
        if data_len as usize > available {
            return Err(ParseError::BadFlexLength { len: data_len as usize, available });
        }
        Ok(Self {
            ch,
            key: parse_node_key(raw, 24)?,
            creat_sqnum: bytes::read_le64(raw, 40)?,
            size: bytes::read_le64(raw, 48)?,
            atime_sec: bytes::read_le64(raw, 56)?,
            ctime_sec: bytes::read_le64(raw, 64)?,
            mtime_sec: bytes::read_le64(raw, 72)?,
            atime_nsec: bytes::read_le32(raw, 80)?,
            ctime_nsec: bytes::read_le32(raw, 84)?,
            mtime_nsec: bytes::read_le32(raw, 88)?,
            nlink: bytes::read_le32(raw, 92)?,
            uid: bytes::read_le32(raw, 96)?,
            gid: bytes::read_le32(raw, 100)?,
            mode: bytes::read_le32(raw, 104)?,
            flags: bytes::read_le32(raw, 108)?,
            data_len,
            xattr_cnt: bytes::read_le32(raw, 116)?,
            xattr_size: bytes::read_le32(raw, 120)?,
            xattr_names: bytes::read_le32(raw, 128)?,
            compr_type: bytes::read_le16(raw, 132)?,
            data: &raw[UBIFS_INO_NODE_SIZE..UBIFS_INO_NODE_SIZE + data_len as usize],
        })
    }

    /// Packs the node to `160 + data_len` bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_INO_NODE_SIZE + self.data.len()];
        self.ch.write_to(&mut out);
        out[24..32].copy_from_slice(&self.key.to_bytes());
        bytes::write_le64(&mut out, 40, self.creat_sqnum);
        bytes::write_le64(&mut out, 48, self.size);
        bytes::write_le64(&mut out, 56, self.atime_sec);
        bytes::write_le64(&mut out, 64, self.ctime_sec);
        bytes::write_le64(&mut out, 72, self.mtime_sec);
        bytes::write_le32(&mut out, 80, self.atime_nsec);
        bytes::write_le32(&mut out, 84, self.ctime_nsec);
        bytes::write_le32(&mut out, 88, self.mtime_nsec);
        bytes::write_le32(&mut out, 92, self.nlink);
        bytes::write_le32(&mut out, 96, self.uid);
        bytes::write_le32(&mut out, 100, self.gid);
        bytes::write_le32(&mut out, 104, self.mode);
        bytes::write_le32(&mut out, 108, self.flags);
        bytes::write_le32(&mut out, 112, self.data_len);
        bytes::write_le32(&mut out, 116, self.xattr_cnt);
        bytes::write_le32(&mut out, 120, self.xattr_size);
        bytes::write_le32(&mut out, 128, self.xattr_names);
        bytes::write_le16(&mut out, 132, self.compr_type);
        out[UBIFS_INO_NODE_SIZE..].copy_from_slice(self.data);
        out
    }
}

/// Directory entry node; extended-attribute entries share the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DentNode<'a> {
    /// Common header.
    pub ch: CommonHeader,
    /// Entry key: parent inode number plus name hash.
    pub key: Key,
    /// Inode number the entry points at; zero marks a deletion.
    pub inum: u64,
    /// Raw inode type of the target.
    pub dtype: u8,
    /// Name length in bytes.
    pub nlen: u16,
    /// Collision-resolution cookie.
    pub cookie: u32,
    /// Entry name, borrowed from the image buffer.
    pub name: &'a [u8],
}

impl<'a> DentNode<'a> {
    /// Parses a directory-entry (or extended-attribute) node at `offset`.
    pub fn parse(buf: &'a [u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_DENT_NODE_SIZE)?;
        let nlen = bytes::read_le16(raw, 50)?;
        let available = raw.len() - UBIFS_DENT_NODE_SIZE;
        if usize::from(nlen) > available {
            return Err(ParseError::BadFlexLength { len: usize::from(nlen), available });
        }
        Ok(Self {
            ch,
            key: parse_node_key(raw, 24)?,
            inum: bytes::read_le64(raw, 40)?,
            dtype: bytes::read_u8(raw, 49)?,
            nlen,
            cookie: bytes::read_le32(raw, 52)?,
            name: &raw[UBIFS_DENT_NODE_SIZE..UBIFS_DENT_NODE_SIZE + usize::from(nlen)],
        })
    }

    /// The entry name, decoded lossily.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }

    /// The decoded target inode type, if the tag is a known one.
    #[must_use]
    pub fn inode_type(&self) -> Option<InodeType> {
        InodeType::try_from(self.dtype).ok()
    }

    /// Whether this entry records a deletion rather than a live name.
    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.inum == 0
    }

    /// Packs the node to `56 + nlen + 1` bytes (name NUL-terminated).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_DENT_NODE_SIZE + self.name.len() + 1];
        self.ch.write_to(&mut out);
        out[24..32].copy_from_slice(&self.key.to_bytes());
        bytes::write_le64(&mut out, 40, self.inum);
        bytes::write_u8(&mut out, 49, self.dtype);
        bytes::write_le16(&mut out, 50, self.nlen);
        bytes::write_le32(&mut out, 52, self.cookie);
        out[UBIFS_DENT_NODE_SIZE..UBIFS_DENT_NODE_SIZE + self.name.len()]
            .copy_from_slice(self.name);
        out
    }
}

/// Data node: one compressed block of at most 4096 decompressed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataNode<'a> {
    /// Common header.
    pub ch: CommonHeader,
    /// Data key: inode number plus block index.
    pub key: Key,
    /// Decompressed size of the payload.
    pub size: u32,
    /// Compression type of the payload.
    pub compr_type: u16,
    /// Compressed size (authenticated filesystems; informational).
    pub compr_size: u16,
    /// Compressed payload, borrowed from the image buffer.
    pub data: &'a [u8],
}

impl<'a> DataNode<'a> {
    /// Parses a data node at `offset`.
    pub fn parse(buf: &'a [u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_DATA_NODE_SIZE)?;
        let size = bytes::read_le32(raw, 40)?;
        if size as usize > UBIFS_BLOCK_SIZE {
            return Err(ParseError::OversizedData { size });
        }
        Ok(Self {
            ch,
            key: parse_node_key(raw, 24)?,
            size,
            compr_type: bytes::read_le16(raw, 44)?,
            compr_size: bytes::read_le16(raw, 46)?,
            data: &raw[UBIFS_DATA_NODE_SIZE..],
        })
    }

    /// The 4 KiB block index this node covers.
    #[must_use]
    pub fn block(&self) -> u32 {
        self.key.payload
    }

    /// Packs the node to `48 + payload` bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_DATA_NODE_SIZE + self.data.len()];
        self.ch.write_to(&mut out);
        out[24..32].copy_from_slice(&self.key.to_bytes());
        bytes::write_le32(&mut out, 40, self.size);
        bytes::write_le16(&mut out, 44, self.compr_type);
        bytes::write_le16(&mut out, 46, self.compr_size);
        out[UBIFS_DATA_NODE_SIZE..].copy_from_slice(self.data);
        out
    }
}

/// Truncation node, journalling a file size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrunNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Truncated inode number.
    pub inum: u32,
    /// Size before truncation.
    pub old_size: u64,
    /// Size after truncation.
    pub new_size: u64,
}

impl TrunNode {
    /// Parses a truncation node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_TRUN_NODE_SIZE)?;
        Ok(Self {
            ch,
            inum: bytes::read_le32(raw, 24)?,
            old_size: bytes::read_le64(raw, 40)?,
            new_size: bytes::read_le64(raw, 48)?,
        })
    }

    /// Packs the node to its 56 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_TRUN_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le32(&mut out, 24, self.inum);
        bytes::write_le64(&mut out, 40, self.old_size);
        bytes::write_le64(&mut out, 48, self.new_size);
        out
    }
}

/// Padding node; `pad_len` dead bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Dead bytes following this node.
    pub pad_len: u32,
}

impl PadNode {
    /// Parses a padding node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_PAD_NODE_SIZE)?;
        Ok(Self { ch, pad_len: bytes::read_le32(raw, 24)? })
    }

    /// Packs the node to its 28 on-disk bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_PAD_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le32(&mut out, 24, self.pad_len);
        out
    }
}

/// Log reference node pointing at a journal bud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefNode {
    /// Common header.
    pub ch: CommonHeader,
    /// LEB of the bud.
    pub lnum: u32,
    /// Offset inside the bud LEB.
    pub offs: u32,
    /// Journal head the bud belongs to (GC 0, BASE 1, DATA 2).
    pub jhead: u32,
}

impl RefNode {
    /// Parses a log reference node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_REF_NODE_SIZE)?;
        Ok(Self {
            ch,
            lnum: bytes::read_le32(raw, 24)?,
            offs: bytes::read_le32(raw, 28)?,
            jhead: bytes::read_le32(raw, 32)?,
        })
    }

    /// Packs the node to its 64 on-disk bytes (padding zeroed).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_REF_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le32(&mut out, 24, self.lnum);
        bytes::write_le32(&mut out, 28, self.offs);
        bytes::write_le32(&mut out, 32, self.jhead);
        out
    }
}

/// One branch of an index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    /// LEB of the target node.
    pub lnum: u32,
    /// Offset of the target node.
    pub offs: u32,
    /// Length of the target node.
    pub len: u32,
    /// Key of the target node.
    pub key: Key,
}

impl Branch {
    /// Parses a branch at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let raw = bytes::take(buf, offset, UBIFS_BRANCH_SIZE)?;
        Ok(Self {
            lnum: bytes::read_le32(raw, 0)?,
            offs: bytes::read_le32(raw, 4)?,
            len: bytes::read_le32(raw, 8)?,
            key: Key::parse(&raw[12..20])?,
        })
    }

    /// Packs the branch to its 20 on-disk bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; UBIFS_BRANCH_SIZE] {
        let mut out = [0u8; UBIFS_BRANCH_SIZE];
        bytes::write_le32(&mut out, 0, self.lnum);
        bytes::write_le32(&mut out, 4, self.offs);
        bytes::write_le32(&mut out, 8, self.len);
        out[12..20].copy_from_slice(&self.key.to_bytes());
        out
    }
}

/// Index node of the wandering tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdxNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Tree level; zero means the branches point at leaf nodes.
    pub level: u16,
    /// Branches, ordered by key.
    pub branches: Vec<Branch>,
}

impl IdxNode {
    /// Parses an index node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_IDX_NODE_SIZE)?;
        let child_cnt = bytes::read_le16(raw, 24)?;
        let need = usize::from(child_cnt) * UBIFS_BRANCH_SIZE;
        let available = raw.len() - UBIFS_IDX_NODE_SIZE;
        if need > available {
            return Err(ParseError::BadFlexLength { len: need, available });
        }
        let mut branches = Vec::with_capacity(usize::from(child_cnt));
        for i in 0..usize::from(child_cnt) {
            branches.push(Branch::parse(raw, UBIFS_IDX_NODE_SIZE + i * UBIFS_BRANCH_SIZE)?);
        }
        Ok(Self { ch, level: bytes::read_le16(raw, 26)?, branches })
    }

    /// Packs the node to `28 + 20 * child_cnt` bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_IDX_NODE_SIZE + self.branches.len() * UBIFS_BRANCH_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le16(&mut out, 24, self.branches.len() as u16);
        bytes::write_le16(&mut out, 26, self.level);
        for (i, branch) in self.branches.iter().enumerate() {
            let at = UBIFS_IDX_NODE_SIZE + i * UBIFS_BRANCH_SIZE;
            out[at..at + UBIFS_BRANCH_SIZE].copy_from_slice(&branch.to_bytes());
        }
        out
    }
}

/// Commit start node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Commit number.
    pub cmt_no: u64,
}

impl CsNode {
    /// Parses a commit-start node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_CS_NODE_SIZE)?;
        Ok(Self { ch, cmt_no: bytes::read_le64(raw, 24)? })
    }

    /// Packs the node to its 32 on-disk bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_CS_NODE_SIZE];
        self.ch.write_to(&mut out);
        bytes::write_le64(&mut out, 24, self.cmt_no);
        out
    }
}

/// Orphan node listing inodes whose last link is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphNode {
    /// Common header.
    pub ch: CommonHeader,
    /// Commit number; the top bit marks the last node of a commit.
    pub cmt_no: u64,
    /// Orphaned inode numbers.
    pub inos: Vec<u64>,
}

impl OrphNode {
    /// Parses an orphan node at `offset`.
    pub fn parse(buf: &[u8], offset: usize) -> crate::Result<Self> {
        let ch = CommonHeader::parse(buf, offset)?;
        let raw = node_slice(buf, offset, &ch, UBIFS_ORPH_NODE_SIZE)?;
        let count = (raw.len() - UBIFS_ORPH_NODE_SIZE) / 8;
        let mut inos = Vec::with_capacity(count);
        for i in 0..count {
            inos.push(bytes::read_le64(raw, UBIFS_ORPH_NODE_SIZE + i * 8)?);
        }
        Ok(Self { ch, cmt_no: bytes::read_le64(raw, 24)?, inos })
    }

    /// Packs the node to `32 + 8 * inos` bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UBIFS_ORPH_NODE_SIZE + self.inos.len() * 8];
        self.ch.write_to(&mut out);
        bytes::write_le64(&mut out, 24, self.cmt_no);
        for (i, ino) in self.inos.iter().enumerate() {
            bytes::write_le64(&mut out, UBIFS_ORPH_NODE_SIZE + i * 8, *ino);
        }
        out
    }
}

/// Any parsed UBIFS node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<'a> {
    /// Inode node.
    Ino(InoNode<'a>),
    /// Data node.
    Data(DataNode<'a>),
    /// Directory entry node.
    Dent(DentNode<'a>),
    /// Extended attribute entry node.
    Xent(DentNode<'a>),
    /// Truncation node.
    Trun(TrunNode),
    /// Padding node.
    Pad(PadNode),
    /// Superblock node.
    Sb(SbNode),
    /// Master node.
    Mst(MstNode),
    /// Log reference node.
    Ref(RefNode),
    /// Index node.
    Idx(IdxNode),
    /// Commit start node.
    Cs(CsNode),
    /// Orphan node.
    Orph(OrphNode),
}

impl Node<'_> {
    /// The common header of the node.
    #[must_use]
    pub fn ch(&self) -> &CommonHeader {
        match self {
            Node::Ino(n) => &n.ch,
            Node::Data(n) => &n.ch,
            Node::Dent(n) | Node::Xent(n) => &n.ch,
            Node::Trun(n) => &n.ch,
            Node::Pad(n) => &n.ch,
            Node::Sb(n) => &n.ch,
            Node::Mst(n) => &n.ch,
            Node::Ref(n) => &n.ch,
            Node::Idx(n) => &n.ch,
            Node::Cs(n) => &n.ch,
            Node::Orph(n) => &n.ch,
        }
    }

    /// The key of the node, for the keyed leaf types.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        match self {
            Node::Ino(n) => Some(n.key),
            Node::Data(n) => Some(n.key),
            Node::Dent(n) | Node::Xent(n) => Some(n.key),
            _ => None,
        }
    }
}

/// Parses whatever node sits at `offset`.
///
/// The common header is parsed first and its `node_type` dispatches to the
/// typed parser. An unknown type yields `Ok(None)`; forward-compatible
/// nodes are skipped, not errors.
pub fn parse_node<'a>(buf: &'a [u8], offset: usize) -> crate::Result<Option<Node<'a>>> {
    let ch = CommonHeader::parse(buf, offset)?;
    let Some(kind) = ch.kind() else {
        return Ok(None);
    };
    Ok(Some(match kind {
        NodeType::Ino => Node::Ino(InoNode::parse(buf, offset)?),
        NodeType::Data => Node::Data(DataNode::parse(buf, offset)?),
        NodeType::Dent => Node::Dent(DentNode::parse(buf, offset)?),
        NodeType::Xent => Node::Xent(DentNode::parse(buf, offset)?),
        NodeType::Trun => Node::Trun(TrunNode::parse(buf, offset)?),
        NodeType::Pad => Node::Pad(PadNode::parse(buf, offset)?),
        NodeType::Sb => Node::Sb(SbNode::parse(buf, offset)?),
        NodeType::Mst => Node::Mst(MstNode::parse(buf, offset)?),
        NodeType::Ref => Node::Ref(RefNode::parse(buf, offset)?),
        NodeType::Idx => Node::Idx(IdxNode::parse(buf, offset)?),
        NodeType::Cs => Node::Cs(CsNode::parse(buf, offset)?),
        NodeType::Orph => Node::Orph(OrphNode::parse(buf, offset)?),
    }))
}

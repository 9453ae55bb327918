//! Synthetic UBI/UBIFS images for the integration suite.
//!
//! The builder assembles bit-exact images in memory: sealed UBI headers on
//! every PEB, a volume table in the layout volume, and a small but complete
//! UBIFS instance: superblock, two master LEBs, a journal log with one
//! bud, an orphan area, a two-level index over the live files, and a LEB
//! of deleted content only a scan can reach.

#![allow(dead_code)]

use std::io::Write;

use ubift_media::key::Key;
use ubift_media::node::{
    Branch, CommonHeader, CsNode, DentNode, IdxNode, InoNode, InodeType, MstNode, NodeType,
    OrphNode, RefNode, SbNode, seal_node,
};
use ubift_media::ubi::{
    EcHeader, UBI_LAYOUT_VOLUME_ID, UBI_VID_DYNAMIC, UBI_VTBL_RECORD_SIZE, VidHeader, VtblRecord,
};

/// Erase block size of the synthetic flash.
pub const BLOCK: usize = 65536;
/// Page size of the synthetic flash.
pub const PAGE: u32 = 2048;
/// Data-area offset recorded in every EC header.
pub const DATA_OFFSET: u32 = 4096;
/// LEB size that follows from the layout above.
pub const LEB_SIZE: usize = BLOCK - DATA_OFFSET as usize;

/// Inode of the deleted file the recovery scenarios resurrect.
pub const DELETED_INUM: u32 = 42;
/// Claimed size of the deleted file.
pub const DELETED_SIZE: u64 = 6000;

/// Assembles PEBs with sealed UBI headers and LEB payloads.
pub struct ImageBuilder {
    pebs: Vec<Vec<u8>>,
    sqnum: u64,
}

impl ImageBuilder {
    /// An image of `peb_count` blocks, each already carrying an EC header.
    pub fn new(peb_count: usize) -> Self {
        let mut pebs = Vec::with_capacity(peb_count);
        for _ in 0..peb_count {
            let mut block = vec![0u8; BLOCK];
            let mut ec = EcHeader {
                version: 1,
                ec: 1,
                vid_hdr_offset: PAGE,
                data_offset: DATA_OFFSET,
                image_seq: 0x1234,
                hdr_crc: 0,
            };
            ec.seal();
            block[..64].copy_from_slice(&ec.to_bytes());
            pebs.push(block);
        }
        Self { pebs, sqnum: 0 }
    }

    fn next_sqnum(&mut self) -> u64 {
        self.sqnum += 1;
        self.sqnum
    }

    /// Maps `peb` to `(vol_id, lnum)` with a sealed VID header.
    pub fn map(&mut self, peb: usize, vol_id: u32, lnum: u32) {
        let sqnum = self.next_sqnum();
        self.map_with_sqnum(peb, vol_id, lnum, sqnum);
    }

    /// Maps `peb` with an explicit VID sequence number.
    pub fn map_with_sqnum(&mut self, peb: usize, vol_id: u32, lnum: u32, sqnum: u64) {
        let mut vid = VidHeader {
            version: 1,
            vol_type: UBI_VID_DYNAMIC,
            copy_flag: 0,
            compat: 0,
            vol_id,
            lnum,
            data_size: 0,
            used_ebs: 0,
            data_pad: 0,
            data_crc: 0,
            sqnum,
            hdr_crc: 0,
        };
        vid.seal();
        let at = PAGE as usize;
        self.pebs[peb][at..at + 64].copy_from_slice(&vid.to_bytes());
    }

    /// Writes bytes into the data area of `peb` at `offset`.
    pub fn write_data(&mut self, peb: usize, offset: usize, bytes: &[u8]) {
        let at = DATA_OFFSET as usize + offset;
        self.pebs[peb][at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Writes a volume-table record into the data area of `peb`.
    pub fn write_vtbl_record(&mut self, peb: usize, slot: usize, name: &str, reserved_pebs: u32) {
        let mut buf = [0u8; 128];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        let mut record = VtblRecord {
            reserved_pebs,
            alignment: 1,
            data_pad: 0,
            vol_type: UBI_VID_DYNAMIC,
            upd_marker: 0,
            name_len: name.len() as u16,
            name: buf,
            flags: 0,
            crc: 0,
        };
        record.seal();
        self.write_data(peb, slot * UBI_VTBL_RECORD_SIZE, &record.to_bytes());
    }

    /// Concatenates the PEBs into the final image.
    pub fn finish(self) -> Vec<u8> {
        self.pebs.concat()
    }
}

/// Compresses with raw DEFLATE, as UBIFS zlib payloads are stored.
pub fn deflate(plain: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(plain).unwrap();
    encoder.finish().unwrap()
}

/// A sealed inode node.
pub fn ino_node(sqnum: u64, inum: u32, size: u64, nlink: u32, mode: u32, compr: u16) -> Vec<u8> {
    let node = InoNode {
        ch: CommonHeader::new(NodeType::Ino, sqnum),
        key: Key::ino(inum),
        creat_sqnum: sqnum,
        size,
        atime_sec: 1_600_000_000,
        ctime_sec: 1_600_000_000,
        mtime_sec: 1_600_000_001,
        atime_nsec: 0,
        ctime_nsec: 0,
        mtime_nsec: 0,
        nlink,
        uid: 1000,
        gid: 1000,
        mode,
        flags: 0,
        data_len: 0,
        xattr_cnt: 0,
        xattr_size: 0,
        xattr_names: 0,
        compr_type: compr,
        data: b"",
    };
    let mut raw = node.to_bytes();
    seal_node(&mut raw);
    raw
}

/// A sealed directory-entry node.
pub fn dent_node(sqnum: u64, parent: u32, name: &[u8], inum: u64, dtype: InodeType) -> Vec<u8> {
    let node = DentNode {
        ch: CommonHeader::new(NodeType::Dent, sqnum),
        key: Key::dent(parent, name),
        inum,
        dtype: dtype as u8,
        nlen: name.len() as u16,
        cookie: 0,
        name,
    };
    let mut raw = node.to_bytes();
    seal_node(&mut raw);
    raw
}

/// A sealed data node carrying `payload` already encoded per `compr_type`.
pub fn data_node(
    sqnum: u64,
    inum: u32,
    block: u32,
    compr_type: u16,
    decompressed_size: u32,
    payload: &[u8],
) -> Vec<u8> {
    let node = ubift_media::node::DataNode {
        ch: CommonHeader::new(NodeType::Data, sqnum),
        key: Key::data(inum, block),
        size: decompressed_size,
        compr_type,
        compr_size: payload.len() as u16,
        data: payload,
    };
    let mut raw = node.to_bytes();
    seal_node(&mut raw);
    raw
}

/// Lays leaf nodes into one LEB and records branches for the index.
pub struct LeafWriter {
    /// LEB the leaves are written to.
    pub lnum: u32,
    /// Accumulated LEB bytes.
    pub buf: Vec<u8>,
    /// Branch per written node.
    pub branches: Vec<Branch>,
}

impl LeafWriter {
    pub fn new(lnum: u32) -> Self {
        Self { lnum, buf: Vec::new(), branches: Vec::new() }
    }

    /// Appends a sealed node at the next aligned offset.
    pub fn push(&mut self, key: Key, node: &[u8]) {
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
        self.branches.push(Branch {
            lnum: self.lnum,
            offs: self.buf.len() as u32,
            len: node.len() as u32,
            key,
        });
        self.buf.extend_from_slice(node);
    }
}

/// Everything the tests need to know about the built filesystem image.
pub struct FsImage {
    /// The raw image bytes.
    pub data: Vec<u8>,
    /// Content of `hello.txt` (root directory, inode 65).
    pub hello_content: &'static [u8],
    /// Content of `docs/deep.txt` (inode 66).
    pub deep_content: &'static [u8],
}

/// Builds the canonical test filesystem.
///
/// Live tree (reachable from the index):
///
/// ```text
/// /              inode 1
/// /hello.txt     inode 65, "hello world"
/// /docs/         inode 64
/// /docs/deep.txt inode 66, "deep"
/// ```
///
/// Deleted content (LEB 11, unreachable from the index): inode 42 with
/// `nlink == 0`, size 6000, two zlib blocks ("hello" padded to 4096 and
/// "world" padded to 1904), a scanned dent naming it `note.txt`, and the
/// deletion marker for that name. Inode 42 is listed in the orphan area.
pub fn build_fs_image() -> FsImage {
    let hello_content: &'static [u8] = b"hello world";
    let deep_content: &'static [u8] = b"deep";

    let mut image = ImageBuilder::new(16);

    // Layout volume: two redundant volume-table copies.
    image.map(0, UBI_LAYOUT_VOLUME_ID, 0);
    image.map(1, UBI_LAYOUT_VOLUME_ID, 1);
    image.write_vtbl_record(0, 0, "linux", 14);
    image.write_vtbl_record(1, 0, "linux", 14);

    // Volume 0 ("linux"): LEB n lives on PEB n + 2.
    for lnum in 0..12u32 {
        image.map(lnum as usize + 2, 0, lnum);
    }

    // LEB 0: superblock.
    let sb = SbNode {
        ch: CommonHeader::new(NodeType::Sb, 1),
        key_hash: 0,
        key_fmt: 0,
        flags: 0,
        min_io_size: PAGE,
        leb_size: LEB_SIZE as u32,
        leb_cnt: 16,
        max_leb_cnt: 32,
        max_bud_bytes: 1 << 20,
        log_lebs: 2,
        lpt_lebs: 2,
        orph_lebs: 1,
        jhead_cnt: 3,
        fanout: 8,
        lsave_cnt: 256,
        fmt_version: 5,
        default_compr: 2,
        rp_uid: 0,
        rp_gid: 0,
        rp_size: 0,
        time_gran: 1_000_000_000,
        uuid: [7u8; 16],
        ro_compat_version: 0,
        hmac: [0u8; 64],
        hmac_wkm: [0u8; 64],
        hash_algo: 0,
        hash_mst: [0u8; 64],
    };
    let mut sb_raw = sb.to_bytes();
    seal_node(&mut sb_raw);
    image.write_data(2, 0, &sb_raw);

    // LEB 10: live leaf nodes.
    let mut leaves = LeafWriter::new(10);
    let mut nodes: Vec<(Key, Vec<u8>)> = vec![
        (Key::ino(1), ino_node(10, 1, 160, 2, 0o040_755, 0)),
        (Key::ino(64), ino_node(11, 64, 160, 2, 0o040_755, 0)),
        (Key::ino(65), ino_node(12, 65, hello_content.len() as u64, 1, 0o100_644, 0)),
        (Key::ino(66), ino_node(13, 66, deep_content.len() as u64, 1, 0o100_644, 0)),
        (Key::dent(1, b"docs"), dent_node(14, 1, b"docs", 64, InodeType::Dir)),
        (Key::dent(1, b"hello.txt"), dent_node(15, 1, b"hello.txt", 65, InodeType::Reg)),
        (Key::dent(64, b"deep.txt"), dent_node(16, 64, b"deep.txt", 66, InodeType::Reg)),
        (
            Key::data(65, 0),
            data_node(17, 65, 0, 0, hello_content.len() as u32, hello_content),
        ),
        (Key::data(66, 0), data_node(18, 66, 0, 0, deep_content.len() as u32, deep_content)),
    ];
    nodes.sort_by_key(|(key, _)| *key);
    for (key, node) in &nodes {
        leaves.push(*key, node);
    }
    let leaf_bytes = leaves.buf.clone();
    image.write_data(12, 0, &leaf_bytes);

    // LEB 9: a two-level index. Two level-0 nodes over the leaf halves,
    // and a level-1 root pointing at them.
    let split = leaves.branches.len() / 2;
    let left = IdxNode {
        ch: CommonHeader::new(NodeType::Idx, 20),
        level: 0,
        branches: leaves.branches[..split].to_vec(),
    };
    let mut left_raw = left.to_bytes();
    seal_node(&mut left_raw);

    let right = IdxNode {
        ch: CommonHeader::new(NodeType::Idx, 21),
        level: 0,
        branches: leaves.branches[split..].to_vec(),
    };
    let mut right_raw = right.to_bytes();
    seal_node(&mut right_raw);

    let right_offs = (left_raw.len() + 7) & !7;
    let root_offs = right_offs + ((right_raw.len() + 7) & !7);
    let root = IdxNode {
        ch: CommonHeader::new(NodeType::Idx, 22),
        level: 1,
        branches: vec![
            Branch {
                lnum: 9,
                offs: 0,
                len: left_raw.len() as u32,
                key: left.branches[0].key,
            },
            Branch {
                lnum: 9,
                offs: right_offs as u32,
                len: right_raw.len() as u32,
                key: right.branches[0].key,
            },
        ],
    };
    let mut root_raw = root.to_bytes();
    seal_node(&mut root_raw);
    image.write_data(11, 0, &left_raw);
    image.write_data(11, right_offs, &right_raw);
    image.write_data(11, root_offs, &root_raw);

    // LEBs 1 and 2: master nodes. LEB 1 holds an old version and the
    // current one; LEB 2 holds the redundant copy of the current one.
    let master = MstNode {
        ch: CommonHeader::new(NodeType::Mst, 100),
        highest_inum: 66,
        cmt_no: 5,
        flags: 0,
        log_lnum: 3,
        root_lnum: 9,
        root_offs: root_offs as u32,
        root_len: root_raw.len() as u32,
        gc_lnum: 12,
        ihead_lnum: 9,
        ihead_offs: (root_offs + root_raw.len()) as u32,
        index_size: (root_offs + root_raw.len()) as u64,
        total_free: 1 << 20,
        total_dirty: 4096,
        total_used: 65536,
        total_dead: 0,
        total_dark: 512,
        lpt_lnum: 5,
        lpt_offs: 0,
        nhead_lnum: 5,
        nhead_offs: 0,
        ltab_lnum: 6,
        ltab_offs: 0,
        lsave_lnum: 0,
        lsave_offs: 0,
        lscan_lnum: 10,
        empty_lebs: 4,
        idx_lebs: 1,
        leb_cnt: 16,
        hash_root_idx: [0u8; 64],
        hash_lpt: [0u8; 64],
        hmac: [0u8; 64],
    };

    let mut stale = master;
    stale.ch = CommonHeader::new(NodeType::Mst, 40);
    stale.cmt_no = 4;
    let mut stale_raw = stale.to_bytes();
    seal_node(&mut stale_raw);
    image.write_data(3, 0, &stale_raw);

    let mut current_raw = master.to_bytes();
    seal_node(&mut current_raw);
    image.write_data(3, 512, &current_raw);

    let mut copy = master;
    copy.ch = CommonHeader::new(NodeType::Mst, 101);
    let mut copy_raw = copy.to_bytes();
    seal_node(&mut copy_raw);
    image.write_data(4, 0, &copy_raw);

    // LEB 3: journal log. Commit start, then a reference to the bud.
    let cs = CsNode { ch: CommonHeader::new(NodeType::Cs, 90), cmt_no: 5 };
    let mut cs_raw = cs.to_bytes();
    seal_node(&mut cs_raw);
    image.write_data(5, 0, &cs_raw);

    let reference = RefNode {
        ch: CommonHeader::new(NodeType::Ref, 91),
        lnum: 8,
        offs: 0,
        jhead: 1,
    };
    let mut ref_raw = reference.to_bytes();
    seal_node(&mut ref_raw);
    image.write_data(5, cs_raw.len(), &ref_raw);

    // LEB 8: the bud. One inode version appended after the commit.
    let bud_ino = ino_node(200, 65, hello_content.len() as u64, 1, 0o100_644, 0);
    image.write_data(10, 0, &bud_ino);

    // LEB 7: orphan area listing the deleted inode.
    let orph =
        OrphNode { ch: CommonHeader::new(NodeType::Orph, 95), cmt_no: 5, inos: vec![42] };
    let mut orph_raw = orph.to_bytes();
    seal_node(&mut orph_raw);
    image.write_data(9, 0, &orph_raw);

    // LEB 11: deleted content, reachable only by scanning.
    let mut deleted = LeafWriter::new(11);
    deleted.push(
        Key::ino(DELETED_INUM),
        &ino_node(30, DELETED_INUM, DELETED_SIZE, 0, 0o100_644, 2),
    );
    let mut block0 = b"hello".to_vec();
    block0.resize(4096, 0);
    let packed0 = deflate(&block0);
    deleted.push(
        Key::data(DELETED_INUM, 0),
        &data_node(31, DELETED_INUM, 0, 2, 4096, &packed0),
    );
    let mut block1 = b"world".to_vec();
    block1.resize(1904, 0);
    let packed1 = deflate(&block1);
    deleted.push(
        Key::data(DELETED_INUM, 1),
        &data_node(32, DELETED_INUM, 1, 2, 1904, &packed1),
    );
    deleted.push(
        Key::dent(1, b"note.txt"),
        &dent_node(33, 1, b"note.txt", u64::from(DELETED_INUM), InodeType::Reg),
    );
    // The deletion marker an unlink writes for the same name.
    deleted.push(Key::dent(1, b"note.txt"), &dent_node(34, 1, b"note.txt", 0, InodeType::Reg));
    let deleted_bytes = deleted.buf.clone();
    image.write_data(13, 0, &deleted_bytes);

    FsImage { data: image.finish(), hello_content, deep_content }
}

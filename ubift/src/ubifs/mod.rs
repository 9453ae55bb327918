//! The UBIFS filesystem layer inside one UBI volume.
//!
//! Fixed layout at the front of every UBIFS volume: LEB 0 holds the
//! superblock, LEBs 1 and 2 accumulate master-node versions (the highest
//! sequence number is the live one), the journal log follows, then the
//! LEB-properties area, then the orphan area.

mod index;
mod journal;
mod scan;

pub use journal::{Bud, Journal, JournalEntry, JournalHead};

use ubift_media::node::{
    CommonHeader, MstNode, Node, NodeType, OrphNode, SbNode, UBIFS_NODE_MAGIC_BYTES,
};
use ubift_media::{crc32, parse_node};

use crate::image::find_signature;
use crate::ubi::UbiVolume;
use crate::{Error, Result};

/// Which LEB a master-node candidate list was scanned from.
const MASTER_LEBS: [u32; 2] = [1, 2];

/// Options for constructing a [`Ubifs`] instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct UbifsOptions {
    /// Which master node of the first master LEB to use, newest first.
    pub masternode_index: usize,
}

/// A master node together with where it was found.
#[derive(Debug, Clone, Copy)]
pub struct MasterCandidate {
    /// The parsed node.
    pub node: MstNode,
    /// LEB the node sits in.
    pub lnum: u32,
    /// Byte offset inside the LEB.
    pub offs: u32,
}

/// Reference to the root index node.
#[derive(Debug, Clone, Copy)]
pub struct RootRef {
    /// LEB of the root index node.
    pub lnum: u32,
    /// Byte offset of the root index node.
    pub offs: u32,
    /// Length of the root index node.
    pub len: u32,
}

/// A UBIFS instance, constructed once and read-only afterwards.
#[derive(Debug)]
pub struct Ubifs<'a> {
    volume: &'a UbiVolume<'a>,
    superblock: SbNode,
    masters: [Vec<MasterCandidate>; 2],
    master: MstNode,
    root: RootRef,
    journal: Journal,
    orphans: Vec<u64>,
}

impl<'a> Ubifs<'a> {
    /// Resolves the filesystem inside `volume`.
    ///
    /// A missing superblock or master node is fatal for this volume;
    /// everything else degrades to logged warnings.
    pub fn new(volume: &'a UbiVolume<'a>, options: UbifsOptions) -> Result<Self> {
        let superblock = Self::parse_superblock(volume)?;
        let masters = [
            Self::scan_master_leb(volume, MASTER_LEBS[0]),
            Self::scan_master_leb(volume, MASTER_LEBS[1]),
        ];
        let master = Self::select_master(volume, &masters, options.masternode_index)?;
        Self::validate_masters(volume, &masters, &master);

        let root = RootRef {
            lnum: master.node.root_lnum,
            offs: master.node.root_offs,
            len: master.node.root_len,
        };
        let journal = Journal::parse(volume, master.node.log_lnum);
        let orphans = Self::collect_orphans(volume, &superblock);

        tracing::info!(volume = %volume.name(), "initialized UBIFS instance");
        Ok(Self { volume, superblock, masters, master: master.node, root, journal, orphans })
    }

    /// Parses the superblock at (LEB 0, offset 0).
    fn parse_superblock(volume: &UbiVolume<'_>) -> Result<SbNode> {
        let missing = || Error::MissingSuperblock { volume: volume.name() };
        let data = volume.leb_data(0).ok_or_else(missing)?;
        let sb = SbNode::parse(data, 0).map_err(|err| {
            tracing::error!(%err, "superblock node did not parse");
            missing()
        })?;
        if sb.ch.kind() != Some(NodeType::Sb) {
            tracing::error!("node at LEB 0 is not a superblock");
            return Err(missing());
        }
        Ok(sb)
    }

    /// Collects every master node in one master LEB, newest first.
    ///
    /// Versions are appended over time, so a LEB usually carries many; the
    /// list is sorted by sequence number descending.
    fn scan_master_leb(volume: &UbiVolume<'_>, lnum: u32) -> Vec<MasterCandidate> {
        let mut found = Vec::new();
        let Some(data) = volume.leb_data(lnum) else {
            tracing::warn!(lnum, "master LEB is not mapped");
            return found;
        };
        let mut at = find_signature(data, &UBIFS_NODE_MAGIC_BYTES, 0);
        while let Some(offs) = at {
            match CommonHeader::parse(data, offs) {
                Ok(ch) if ch.kind() == Some(NodeType::Mst) => {
                    match MstNode::parse(data, offs) {
                        Ok(node) => found.push(MasterCandidate { node, lnum, offs: offs as u32 }),
                        Err(err) => {
                            tracing::warn!(lnum, offs, %err, "unparsable master node")
                        }
                    }
                }
                _ => {}
            }
            at = find_signature(data, &UBIFS_NODE_MAGIC_BYTES, offs + 4);
        }
        found.sort_by(|a, b| b.node.ch.sqnum.cmp(&a.node.ch.sqnum));
        tracing::info!(lnum, count = found.len(), "collected master nodes");
        found
    }

    /// Picks the configured master candidate from the first master LEB's
    /// list. An empty list is fatal for the volume.
    fn select_master(
        volume: &UbiVolume<'_>,
        masters: &[Vec<MasterCandidate>; 2],
        index: usize,
    ) -> Result<MasterCandidate> {
        let list = &masters[0];
        if list.is_empty() {
            return Err(Error::MissingMaster { volume: volume.name() });
        }
        list.get(index)
            .copied()
            .ok_or(Error::InvalidMasterIndex { index, available: list.len() })
    }

    /// Cross-checks the two master lists and the chosen master's CRC.
    ///
    /// The newest copies in LEBs 1 and 2 must agree on everything but their
    /// sequence numbers; both checks only warn.
    fn validate_masters(
        volume: &UbiVolume<'_>,
        masters: &[Vec<MasterCandidate>; 2],
        chosen: &MasterCandidate,
    ) {
        match (masters[0].first(), masters[1].first()) {
            (Some(a), Some(b)) => {
                // Skip the 8-byte header prefix and the 8-byte sqnum.
                let crc_a = Self::master_content_crc(volume, a);
                let crc_b = Self::master_content_crc(volume, b);
                if crc_a != crc_b {
                    tracing::warn!(
                        "newest master nodes of LEB 1 and LEB 2 differ; one copy may be corrupted"
                    );
                }
            }
            _ => tracing::warn!("only one master LEB produced candidates"),
        }

        if !chosen.node.ch.crc_ok {
            tracing::warn!("selected master node has an invalid CRC");
        }
    }

    /// CRC over a master node's content, excluding header and sqnum.
    fn master_content_crc(volume: &UbiVolume<'_>, candidate: &MasterCandidate) -> Option<u32> {
        let data = volume.leb_data(candidate.lnum)?;
        let start = candidate.offs as usize + 16;
        let end = candidate.offs as usize + candidate.node.ch.len as usize;
        data.get(start..end).map(crc32)
    }

    /// Collects the inode numbers of every leading orphan node in the
    /// orphan area.
    fn collect_orphans(volume: &UbiVolume<'_>, sb: &SbNode) -> Vec<u64> {
        let mut orphans = Vec::new();
        let first = 1 + 2 + sb.log_lebs + sb.lpt_lebs;
        for lnum in first..first + sb.orph_lebs {
            let Some(data) = volume.leb_data(lnum) else {
                continue;
            };
            let mut offs = 0usize;
            while let Ok(node) = OrphNode::parse(data, offs) {
                if node.ch.kind() != Some(NodeType::Orph) {
                    break;
                }
                orphans.extend(&node.inos);
                offs += align8(node.ch.len as usize);
            }
        }
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "collected orphaned inodes");
        }
        orphans
    }

    /// The volume this filesystem lives in.
    #[must_use]
    pub fn volume(&self) -> &'a UbiVolume<'a> {
        self.volume
    }

    /// The superblock node.
    #[must_use]
    pub fn superblock(&self) -> &SbNode {
        &self.superblock
    }

    /// The selected (live) master node.
    #[must_use]
    pub fn master(&self) -> &MstNode {
        &self.master
    }

    /// All master candidates found in LEBs 1 and 2, newest first.
    #[must_use]
    pub fn masters(&self) -> &[Vec<MasterCandidate>; 2] {
        &self.masters
    }

    /// Reference to the root index node.
    #[must_use]
    pub fn root(&self) -> RootRef {
        self.root
    }

    /// The journal metadata.
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Inode numbers recorded in the orphan area.
    #[must_use]
    pub fn orphans(&self) -> &[u64] {
        &self.orphans
    }

    /// Total filesystem size per the superblock.
    #[must_use]
    pub fn fs_size(&self) -> u64 {
        u64::from(self.superblock.leb_cnt) * u64::from(self.superblock.leb_size)
    }

    /// The data bytes of LEB `lnum`, if mapped.
    #[must_use]
    pub fn leb_data(&self, lnum: u32) -> Option<&'a [u8]> {
        self.volume.leb_data(lnum)
    }

    /// Parses whatever node sits at `(lnum, offs)`, logging and absorbing
    /// failures. A CRC mismatch is logged but does not reject the node.
    #[must_use]
    pub fn node_at(&self, lnum: u32, offs: u32) -> Option<Node<'a>> {
        let data = self.leb_data(lnum)?;
        match parse_node(data, offs as usize) {
            Ok(Some(node)) => {
                if !node.ch().crc_ok {
                    tracing::warn!(lnum, offs, "node CRC mismatch");
                }
                Some(node)
            }
            Ok(None) => {
                tracing::debug!(lnum, offs, "unknown node type, skipping");
                None
            }
            Err(err) => {
                tracing::warn!(lnum, offs, %err, "unparsable node, skipping");
                None
            }
        }
    }
}

/// Rounds `n` up to the 8-byte node alignment.
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

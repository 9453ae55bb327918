//! Visitors over index traversals and signature scans.
//!
//! Both the wandering-tree walk and the linear scan deliver parsed nodes to
//! a [`NodeVisitor`]. The canonical collectors bucket the leaf types the
//! recovery pipeline needs; a visitor error is logged by the caller and
//! never aborts the walk that produced it.

use std::collections::BTreeMap;

use ubift_media::node::{DataNode, DentNode, InoNode, Node};

use crate::Result;
use crate::ubifs::Ubifs;

/// Where a visited node was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Inside a mapped logical erase block.
    Leb {
        /// Logical erase block number.
        lnum: u32,
        /// Byte offset inside the LEB data area.
        offs: u32,
    },
    /// Inside a physical erase block (partition scans, where no LEB mapping
    /// is assumed).
    Peb {
        /// Physical erase block number, relative to the partition.
        peb: u32,
        /// Byte offset inside the PEB.
        offs: u32,
    },
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leb { lnum, offs } => write!(f, "LEB {lnum}:{offs}"),
            Self::Peb { peb, offs } => write!(f, "PEB {peb}:{offs}"),
        }
    }
}

/// Callback invoked for every node a traversal or scan surfaces.
pub trait NodeVisitor<'a> {
    /// Observes one parsed node. Errors are logged by the caller and do not
    /// stop the enclosing walk.
    fn visit(&mut self, ubifs: &Ubifs<'a>, node: &Node<'a>, location: Location) -> Result<()>;
}

/// Collects inode and directory-entry nodes.
#[derive(Debug, Default)]
pub struct InodeDentCollector<'a> {
    /// Inode nodes keyed by inode number.
    pub inodes: BTreeMap<u64, InoNode<'a>>,
    /// Directory entries keyed by their target inode number.
    pub dents: BTreeMap<u64, Vec<DentNode<'a>>>,
}

impl<'a> NodeVisitor<'a> for InodeDentCollector<'a> {
    fn visit(&mut self, _ubifs: &Ubifs<'a>, node: &Node<'a>, _location: Location) -> Result<()> {
        match node {
            Node::Ino(ino) => {
                self.inodes.insert(u64::from(ino.key.inum), *ino);
            }
            Node::Dent(dent) => {
                self.dents.entry(dent.inum).or_default().push(*dent);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Collects inode, directory-entry and data nodes, remembering the order
/// directory entries were visited in.
#[derive(Debug, Default)]
pub struct AllCollector<'a> {
    /// Inode nodes keyed by inode number.
    pub inodes: BTreeMap<u64, InoNode<'a>>,
    /// Directory entries keyed by their target inode number.
    pub dents: BTreeMap<u64, Vec<DentNode<'a>>>,
    /// Directory entries in visit order.
    pub dent_sequence: Vec<DentNode<'a>>,
    /// Data nodes keyed by inode number.
    pub data_nodes: BTreeMap<u64, Vec<DataNode<'a>>>,
}

impl<'a> NodeVisitor<'a> for AllCollector<'a> {
    fn visit(&mut self, _ubifs: &Ubifs<'a>, node: &Node<'a>, _location: Location) -> Result<()> {
        match node {
            Node::Ino(ino) => {
                self.inodes.insert(u64::from(ino.key.inum), *ino);
            }
            Node::Dent(dent) => {
                self.dents.entry(dent.inum).or_default().push(*dent);
                self.dent_sequence.push(*dent);
            }
            Node::Data(data) => {
                self.data_nodes.entry(u64::from(data.key.inum)).or_default().push(*data);
            }
            _ => {}
        }
        Ok(())
    }
}

/// Collects directory entries and extended-attribute entries.
#[derive(Debug, Default)]
pub struct DentXentCollector<'a> {
    /// Directory entries keyed by their target inode number.
    pub dents: BTreeMap<u64, Vec<DentNode<'a>>>,
    /// Extended-attribute entries keyed by their target inode number.
    pub xents: BTreeMap<u64, Vec<DentNode<'a>>>,
}

impl<'a> NodeVisitor<'a> for DentXentCollector<'a> {
    fn visit(&mut self, _ubifs: &Ubifs<'a>, node: &Node<'a>, _location: Location) -> Result<()> {
        match node {
            Node::Dent(dent) => {
                self.dents.entry(dent.inum).or_default().push(*dent);
            }
            Node::Xent(xent) => {
                self.xents.entry(xent.inum).or_default().push(*xent);
            }
            _ => {}
        }
        Ok(())
    }
}

/// A deletion marker together with the entries that share its key bucket.
///
/// A directory entry with `inum == 0` records that the name hashing to
/// `(parent_inum, name_hash)` was removed. Any other entry in the same
/// bucket (typically the superseded live entry an earlier commit wrote)
/// names the file the marker deleted.
#[derive(Debug, Clone)]
pub struct DeletedEntryGroup<'a> {
    /// Parent directory inode of the deleted name.
    pub parent_inum: u32,
    /// r5 hash of the deleted name.
    pub name_hash: u32,
    /// The deletion marker itself.
    pub marker: DentNode<'a>,
    /// Entries sharing the marker's `(parent, hash)` bucket.
    pub peers: Vec<DentNode<'a>>,
}

/// Clusters deletion markers with the entries they deleted.
#[must_use]
pub fn related_deleted_entries<'a>(
    dents: &BTreeMap<u64, Vec<DentNode<'a>>>,
) -> Vec<DeletedEntryGroup<'a>> {
    let mut buckets: BTreeMap<(u32, u32), Vec<DentNode<'a>>> = BTreeMap::new();
    for dent in dents.values().flatten() {
        buckets.entry((dent.key.inum, dent.key.payload)).or_default().push(*dent);
    }

    let mut groups = Vec::new();
    for dent in dents.get(&0).into_iter().flatten() {
        let bucket = (dent.key.inum, dent.key.payload);
        let peers = buckets
            .get(&bucket)
            .into_iter()
            .flatten()
            .filter(|peer| !peer.is_deletion())
            .copied()
            .collect();
        groups.push(DeletedEntryGroup {
            parent_inum: bucket.0,
            name_hash: bucket.1,
            marker: *dent,
            peers,
        });
    }
    groups
}

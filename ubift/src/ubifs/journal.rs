//! The UBIFS journal, surfaced as metadata.
//!
//! The log LEB is a sequence of commit-start, reference and padding nodes.
//! Each reference points one of the three journal heads at a bud: a LEB
//! that collected nodes appended since the last commit. The journal is
//! never replayed into the index; ubift reports what is there.

use std::collections::BTreeMap;

use ubift_media::node::{
    CommonHeader, CsNode, NodeType, PadNode, RefNode, UBIFS_PAD_NODE_SIZE,
};

use crate::ubi::UbiVolume;
use crate::ubifs::align8;

/// The three journal heads a reference node can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum JournalHead {
    /// Garbage-collection head.
    Gc = 0,
    /// Base head (non-data nodes).
    Base = 1,
    /// Data head.
    Data = 2,
}

impl JournalHead {
    /// Decodes a `jhead` field.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Gc),
            1 => Some(Self::Base),
            2 => Some(Self::Data),
            _ => None,
        }
    }

    /// Human-readable head name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Gc => "GC",
            Self::Base => "BASE",
            Self::Data => "DATA",
        }
    }
}

/// Summary of one node seen while walking the journal.
#[derive(Debug, Clone, Copy)]
pub struct JournalEntry {
    /// LEB the node sits in.
    pub lnum: u32,
    /// Byte offset inside the LEB.
    pub offs: u32,
    /// The node's common header.
    pub ch: CommonHeader,
}

/// One journal bud: the nodes a head appended since the last commit.
#[derive(Debug, Clone)]
pub struct Bud {
    /// Head this bud belongs to.
    pub head: JournalHead,
    /// Bud LEB.
    pub lnum: u32,
    /// Offset the head starts appending at.
    pub offs: u32,
    /// Nodes found linearly from the start offset.
    pub entries: Vec<JournalEntry>,
}

/// Journal metadata: the log walk plus the per-head buds.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    /// Commit-start node of the last commit, when present.
    pub cs: Option<CsNode>,
    /// Nodes of the log LEB in on-disk order.
    pub log: Vec<JournalEntry>,
    /// Reference node per journal head.
    pub refs: BTreeMap<JournalHead, RefNode>,
    /// Bud per journal head.
    pub buds: BTreeMap<JournalHead, Bud>,
}

impl Journal {
    /// Walks the log LEB at `log_lnum` and chases each head's reference.
    #[must_use]
    pub fn parse(volume: &UbiVolume<'_>, log_lnum: u32) -> Self {
        let mut journal = Self::default();
        let Some(data) = volume.leb_data(log_lnum) else {
            tracing::warn!(log_lnum, "journal log LEB is not mapped");
            return journal;
        };

        let mut offs = 0usize;
        while let Ok(ch) = CommonHeader::parse(data, offs) {
            journal.log.push(JournalEntry { lnum: log_lnum, offs: offs as u32, ch });
            let advance = match ch.kind() {
                Some(NodeType::Pad) => match PadNode::parse(data, offs) {
                    Ok(pad) => UBIFS_PAD_NODE_SIZE + pad.pad_len as usize,
                    Err(_) => break,
                },
                Some(NodeType::Cs) => {
                    match CsNode::parse(data, offs) {
                        Ok(cs) => journal.cs = Some(cs),
                        Err(err) => tracing::warn!(offs, %err, "unparsable commit-start node"),
                    }
                    align8(ch.len as usize)
                }
                Some(NodeType::Ref) => {
                    match RefNode::parse(data, offs) {
                        Ok(reference) => match JournalHead::from_raw(reference.jhead) {
                            Some(head) => {
                                journal.refs.insert(head, reference);
                            }
                            None => {
                                tracing::warn!(jhead = reference.jhead, "unknown journal head")
                            }
                        },
                        Err(err) => tracing::warn!(offs, %err, "unparsable reference node"),
                    }
                    align8(ch.len as usize)
                }
                _ => align8(ch.len as usize),
            };
            if advance == 0 {
                break;
            }
            offs += advance;
        }

        for (head, reference) in &journal.refs {
            journal
                .buds
                .insert(*head, Self::parse_bud(volume, *head, reference.lnum, reference.offs));
        }
        tracing::info!(
            log_nodes = journal.log.len(),
            heads = journal.refs.len(),
            "parsed journal metadata"
        );
        journal
    }

    /// Parses nodes linearly from `(lnum, offs)` until the magic fails.
    fn parse_bud(volume: &UbiVolume<'_>, head: JournalHead, lnum: u32, offs: u32) -> Bud {
        let mut bud = Bud { head, lnum, offs, entries: Vec::new() };
        let Some(data) = volume.leb_data(lnum) else {
            tracing::warn!(lnum, head = head.label(), "bud LEB is not mapped");
            return bud;
        };
        let mut at = offs as usize;
        while let Ok(ch) = CommonHeader::parse(data, at) {
            bud.entries.push(JournalEntry { lnum, offs: at as u32, ch });
            let advance = align8(ch.len as usize);
            if advance == 0 {
                break;
            }
            at += advance;
        }
        bud
    }
}

//! Lookups and traversal over the wandering B-tree.
//!
//! Branch keys are sorted, so descent picks the greatest key at or below
//! the search key. Range lookups descend the smallest contiguous branch
//! window covering the interval. Failures like unmapped branch targets
//! and unparsable children degrade to warnings and skipped branches.

use ubift_media::key::Key;
use ubift_media::node::{IdxNode, Node};

use crate::ubifs::Ubifs;
use crate::visitor::{Location, NodeVisitor};

/// Depth guard against reference cycles in corrupted trees.
const MAX_DEPTH: usize = 128;

impl<'a> Ubifs<'a> {
    /// Parses the index node a branch or the master points at.
    fn idx_at(&self, lnum: u32, offs: u32) -> Option<IdxNode> {
        if !self.volume().is_mapped(lnum) {
            tracing::warn!(lnum, offs, "index branch references an unmapped LEB");
            return None;
        }
        match self.node_at(lnum, offs) {
            Some(Node::Idx(idx)) => Some(idx),
            Some(_) => {
                tracing::error!(lnum, offs, "expected an index node while descending the tree");
                None
            }
            None => None,
        }
    }

    /// The root index node per the selected master.
    #[must_use]
    pub fn root_idx(&self) -> Option<IdxNode> {
        let root = self.root();
        self.idx_at(root.lnum, root.offs)
    }

    /// Point lookup: the leaf node stored under exactly `key`.
    #[must_use]
    pub fn find(&self, key: Key) -> Option<Node<'a>> {
        let mut idx = self.root_idx()?;
        for _ in 0..MAX_DEPTH {
            if idx.branches.is_empty() {
                return None;
            }
            // The greatest branch key at or below the search key; the first
            // branch when the key precedes them all.
            let mut selected = 0;
            for (i, branch) in idx.branches.iter().enumerate() {
                if branch.key <= key {
                    selected = i;
                } else {
                    break;
                }
            }
            let branch = idx.branches[selected];
            if idx.level == 0 {
                return if branch.key == key {
                    self.node_at(branch.lnum, branch.offs)
                } else {
                    None
                };
            }
            idx = self.idx_at(branch.lnum, branch.offs)?;
        }
        tracing::error!("index descent exceeded the depth guard; tree is cyclic or corrupt");
        None
    }

    /// Range lookup: all leaf nodes with `min <= key < max`.
    #[must_use]
    pub fn find_range(&self, min: Key, max: Key) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        if let Some(root) = self.root_idx() {
            self.range_into(&root, min, max, &mut out, 0);
        }
        out
    }

    /// Recursive worker of [`Self::find_range`].
    fn range_into(&self, idx: &IdxNode, min: Key, max: Key, out: &mut Vec<Node<'a>>, depth: usize) {
        if depth > MAX_DEPTH {
            tracing::error!("index descent exceeded the depth guard; tree is cyclic or corrupt");
            return;
        }
        if idx.branches.is_empty() {
            return;
        }
        if idx.level == 0 {
            for branch in &idx.branches {
                if branch.key >= min && branch.key < max {
                    if let Some(node) = self.node_at(branch.lnum, branch.offs) {
                        out.push(node);
                    }
                }
            }
            return;
        }

        // Smallest contiguous branch window covering [min, max], edges
        // clamped to the node.
        let last = idx.branches.len() - 1;
        let mut lo = 0usize;
        for (i, branch) in idx.branches.iter().enumerate() {
            if branch.key <= min {
                lo = i;
            } else {
                break;
            }
        }
        let mut hi = last;
        for (i, branch) in idx.branches.iter().enumerate() {
            if branch.key >= max {
                hi = i;
                break;
            }
        }
        for branch in &idx.branches[lo..=hi] {
            if let Some(child) = self.idx_at(branch.lnum, branch.offs) {
                self.range_into(&child, min, max, out, depth + 1);
            }
        }
    }

    /// Pre-order traversal: the visitor observes every branch target.
    pub fn traverse(&self, visitor: &mut dyn NodeVisitor<'a>) {
        if let Some(root) = self.root_idx() {
            self.walk(&root, visitor, 0);
        }
    }

    /// Recursive worker of [`Self::traverse`].
    fn walk(&self, idx: &IdxNode, visitor: &mut dyn NodeVisitor<'a>, depth: usize) {
        if depth > MAX_DEPTH {
            tracing::error!("index traversal exceeded the depth guard; tree is cyclic or corrupt");
            return;
        }
        for branch in &idx.branches {
            if !self.volume().is_mapped(branch.lnum) {
                tracing::warn!(
                    lnum = branch.lnum,
                    offs = branch.offs,
                    "index branch references an unmapped LEB, skipping"
                );
                continue;
            }
            let Some(node) = self.node_at(branch.lnum, branch.offs) else {
                continue;
            };
            let location = Location::Leb { lnum: branch.lnum, offs: branch.offs };
            if let Err(err) = visitor.visit(self, &node, location) {
                tracing::warn!(%location, %err, "visitor failed on a node");
            }
            if let Node::Idx(child) = node {
                self.walk(&child, visitor, depth + 1);
            }
        }
    }
}

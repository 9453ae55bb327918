//! Linear signature scanning.
//!
//! Scanning searches a byte range for the node magic and hands every
//! parsable hit to a visitor. Unlike the index walk, a scan surfaces nodes
//! no branch points at any more (superseded versions, deleted entries,
//! data of unlinked inodes), which is what deleted-file recovery feeds on.

use ubift_media::node::UBIFS_NODE_MAGIC_BYTES;
use ubift_media::parse_node;

use crate::image::find_signature;
use crate::ubifs::Ubifs;
use crate::visitor::{Location, NodeVisitor};

impl<'a> Ubifs<'a> {
    /// Scans one mapped LEB for node signatures.
    pub fn scan_leb(&self, lnum: u32, visitor: &mut dyn NodeVisitor<'a>) {
        let Some(data) = self.leb_data(lnum) else {
            tracing::warn!(lnum, "cannot scan an unmapped LEB");
            return;
        };
        self.scan_slice(data, visitor, |offs| Location::Leb { lnum, offs });
    }

    /// Scans every mapped LEB of the volume in logical order.
    pub fn scan_volume(&self, visitor: &mut dyn NodeVisitor<'a>) {
        let lnums: Vec<u32> = self.volume().lebs().keys().copied().collect();
        for lnum in lnums {
            self.scan_leb(lnum, visitor);
        }
    }

    /// Scans the whole partition byte range the owning UBI instance sits
    /// in, addressing hits by PEB.
    ///
    /// This also covers PEBs outside the volume's LEB mapping, at the cost
    /// of not knowing which volume a hit belongs to.
    pub fn scan_partition(&self, visitor: &mut dyn NodeVisitor<'a>) {
        let image = self.volume().image();
        let partition = self.volume().partition();
        let block_size = image.block_size();
        let data = partition.data(image);
        self.scan_slice(data, visitor, |offs| Location::Peb {
            peb: offs / block_size,
            offs: offs % block_size,
        });
    }

    /// Shared scan loop: find magics, parse, visit.
    fn scan_slice(
        &self,
        data: &'a [u8],
        visitor: &mut dyn NodeVisitor<'a>,
        locate: impl Fn(u32) -> Location,
    ) {
        let mut at = find_signature(data, &UBIFS_NODE_MAGIC_BYTES, 0);
        while let Some(offs) = at {
            let location = locate(offs as u32);
            match parse_node(data, offs) {
                Ok(Some(node)) => {
                    if let Err(err) = visitor.visit(self, &node, location) {
                        tracing::warn!(%location, %err, "visitor failed on a scanned node");
                    }
                }
                Ok(None) => tracing::debug!(%location, "scanned unknown node type"),
                Err(err) => tracing::debug!(%location, %err, "scan hit did not parse"),
            }
            at = find_signature(data, &UBIFS_NODE_MAGIC_BYTES, offs + 4);
        }
    }
}

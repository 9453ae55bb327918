//! Partitioning a raw image into UBI instances and unallocated space.
//!
//! The partitioner walks the image for erase-counter magics and groups
//! contiguous runs of UBI blocks into partitions. Short gaps (erased or bad
//! blocks inside an instance) are tolerated; a repeated `(vol_id, lnum)`
//! pair ends the run, because wear-leveling never maps the same logical
//! block twice inside one instance; seeing it again means a second UBI
//! image starts back-to-back with the first.

use std::collections::HashSet;

use ubift_media::ubi::{EcHeader, UBI_EC_HDR_MAGIC_BYTES, VidHeader};

use crate::image::{Image, find_signature};

/// Blocks without an erase-counter magic tolerated inside one partition.
pub const DEFAULT_GAP_THRESHOLD: u32 = 3;

/// What a partition contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// A run of UBI erase blocks.
    Ubi,
    /// Space with no recognised content.
    Unallocated,
}

impl PartitionKind {
    /// Human-readable tag used by the listing renderers.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Ubi => "UBI",
            Self::Unallocated => "Unallocated",
        }
    }
}

/// A half-open byte range `[offset, offset + len)` of an image.
///
/// Partitions reference the image by position only; they hold no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    offset: usize,
    len: usize,
    kind: PartitionKind,
}

impl Partition {
    /// Creates a partition, warning when it is not block-aligned.
    #[must_use]
    pub fn new(image: &Image, offset: usize, len: usize, kind: PartitionKind) -> Self {
        let block_size = image.block_size() as usize;
        if block_size > 0 && (offset % block_size != 0 || len % block_size != 0) {
            tracing::warn!(offset, len, block_size, "partition is not aligned to erase blocks");
        }
        tracing::info!(offset, len, kind = kind.label(), "initialized partition");
        Self { offset, len, kind }
    }

    /// Byte offset of the partition inside the image.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the partition in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the partition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the partition.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// What the partition contains.
    #[must_use]
    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    /// The partition bytes.
    #[must_use]
    pub fn data<'a>(&self, image: &'a Image) -> &'a [u8] {
        &image.data()[self.offset..self.end()]
    }

    /// First physical erase block of the partition.
    #[must_use]
    pub fn peb_offset(&self, image: &Image) -> u32 {
        (self.offset / image.block_size() as usize) as u32
    }

    /// Number of physical erase blocks the partition spans.
    #[must_use]
    pub fn peb_count(&self, image: &Image) -> u32 {
        (self.len / image.block_size() as usize) as u32
    }
}

/// Splits an image into UBI partitions by erase-counter signatures.
#[derive(Debug, Clone, Copy)]
pub struct UbiPartitioner {
    gap_threshold: u32,
}

impl Default for UbiPartitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl UbiPartitioner {
    /// A partitioner with the default gap tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self { gap_threshold: DEFAULT_GAP_THRESHOLD }
    }

    /// A partitioner tolerating up to `gap_threshold` magic-less blocks.
    #[must_use]
    pub fn with_gap_threshold(gap_threshold: u32) -> Self {
        Self { gap_threshold }
    }

    /// Partitions the image. With `fill`, unallocated partitions are
    /// inserted so the result tiles the whole image.
    #[must_use]
    pub fn partition(&self, image: &Image, fill: bool) -> Vec<Partition> {
        tracing::info!("partitioning the image by UBI instances");
        let mut partitions = Vec::new();
        let mut from = 0;
        while let Some(partition) = self.next_partition(image, from) {
            from = partition.end();
            partitions.push(partition);
        }
        if fill { fill_partitions(image, partitions) } else { partitions }
    }

    /// Finds the next UBI partition at or after byte `from`.
    fn next_partition(&self, image: &Image, from: usize) -> Option<Partition> {
        let data = image.data();
        let block_size = image.block_size() as usize;
        if block_size == 0 {
            return None;
        }
        let start = find_signature(data, &UBI_EC_HDR_MAGIC_BYTES, from)?;

        let mut seen: HashSet<(u32, u32)> = HashSet::new();
        let mut last_ec = start;
        let mut gap = 0u32;
        let mut current = start;
        while current + 4 <= data.len() {
            if data[current..current + 4] == UBI_EC_HDR_MAGIC_BYTES {
                if self.repeats_mapping(data, current, &mut seen) {
                    tracing::info!(
                        offset = current,
                        "repeated (vol_id, lnum); treating as the start of a second UBI instance"
                    );
                    break;
                }
                last_ec = current;
                gap = 0;
            } else {
                gap += 1;
                if gap > self.gap_threshold {
                    break;
                }
            }
            current += block_size;
        }

        // Trailing gap blocks stay outside the partition.
        let end = last_ec + block_size;
        Some(Partition::new(image, start, end - start, PartitionKind::Ubi))
    }

    /// Records the `(vol_id, lnum)` mapping of the PEB at `offset`;
    /// returns `true` when the pair was already seen in this partition.
    fn repeats_mapping(
        &self,
        data: &[u8],
        offset: usize,
        seen: &mut HashSet<(u32, u32)>,
    ) -> bool {
        let Ok(ec) = EcHeader::parse(data, offset) else {
            return false;
        };
        let Ok(vid) = VidHeader::parse(data, offset + ec.vid_hdr_offset as usize) else {
            return false;
        };
        !seen.insert((vid.vol_id, vid.lnum))
    }
}

/// Inserts unallocated partitions so the list covers `[0, len(image))`.
fn fill_partitions(image: &Image, mut partitions: Vec<Partition>) -> Vec<Partition> {
    partitions.sort_by_key(Partition::offset);
    let mut filled = Vec::with_capacity(partitions.len() * 2 + 1);
    let mut cursor = 0usize;
    for partition in partitions {
        if partition.offset() > cursor {
            filled.push(Partition::new(
                image,
                cursor,
                partition.offset() - cursor,
                PartitionKind::Unallocated,
            ));
        }
        cursor = partition.end();
        filled.push(partition);
    }
    if cursor < image.data().len() || filled.is_empty() {
        filled.push(Partition::new(
            image,
            cursor,
            image.data().len() - cursor,
            PartitionKind::Unallocated,
        ));
    }
    filled
}

//! Read-only forensic reconstruction of UBI/UBIFS from raw NAND images.
//!
//! `ubift` takes an opaque flash dump, optionally still interleaved with
//! OOB spare bytes, and rebuilds everything between the raw bytes and the
//! files: flash geometry, UBI instances and their volumes, the UBIFS node
//! graph, and finally directory trees and file contents, including data
//! the filesystem itself already considers deleted.
//!
//! # Layers
//!
//! ```text
//! bytes
//!  └─ Image            geometry inference, OOB stripping
//!      └─ Partition    UBI instance boundaries
//!          └─ Ubi      LEB→PEB mapping, volume table
//!              └─ Ubifs    superblock, masters, journal, orphans
//!                  ├─ index  find / find_range / traverse
//!                  ├─ scan   signature scanning (reaches deleted nodes)
//!                  └─ recover  directory trees, file contents
//! ```
//!
//! The analysis never writes to the image and is a deterministic function
//! of the bytes and the configuration; the output directory of recovery is
//! the only thing it mutates.

mod compress;
mod error;
mod image;
mod partition;
mod recover;
mod report;
mod ubi;
mod ubifs;
mod visitor;

pub use compress::decompress;
pub use error::{Error, Result};
pub use image::{Image, ImageGeometry, strip_oob};
pub use partition::{
    DEFAULT_GAP_THRESHOLD, Partition, PartitionKind, UbiPartitioner,
};
pub use recover::{
    CancelToken, RAW_VOLUME_DUMP, RECOVERED_FILES_DIR, RECOVERED_INODE_PREFIX, RecoverOptions,
    RecoverySummary, first_dent_per_inum, index_inode_bytes, rebuild_bytes, recover_image,
    recover_volume, safe_component, scanned_inode_bytes, unroll_path,
};
pub use report::{DeletedInodeInfo, VolumeReport, readable_size, volume_report};
pub use ubi::{Leb, Ubi, UbiVolume};
pub use ubifs::{
    Bud, Journal, JournalEntry, JournalHead, MasterCandidate, RootRef, Ubifs, UbifsOptions,
};
pub use visitor::{
    AllCollector, DeletedEntryGroup, DentXentCollector, InodeDentCollector, Location, NodeVisitor,
    related_deleted_entries,
};

//! Recoverability accounting for one UBIFS volume.
//!
//! The report counts scanned inodes whose link count dropped to zero and
//! estimates how many of their bytes the data nodes still on flash can
//! give back. The estimate assumes 4 KiB data blocks and is deliberately
//! optimistic about partially reclaimed files.

use ubift_media::node::UBIFS_BLOCK_SIZE;

use crate::ubifs::Ubifs;
use crate::visitor::AllCollector;

/// What is known about one deleted inode.
#[derive(Debug, Clone)]
pub struct DeletedInodeInfo {
    /// Inode number.
    pub inum: u64,
    /// Size the inode claimed.
    pub size: u64,
    /// Data nodes still found for it.
    pub data_nodes: u64,
    /// Estimated recoverable bytes.
    pub recoverable: u64,
    /// A name from a scanned directory entry, when one survives.
    pub name: Option<String>,
}

/// Recoverability report over one volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeReport {
    /// Count of deleted (link count zero, CRC-clean) inodes.
    pub deleted_inodes: u64,
    /// Sum of their claimed sizes.
    pub deleted_bytes: u64,
    /// Estimated recoverable bytes across them.
    pub recoverable_bytes: u64,
    /// Master accounting: free bytes.
    pub total_free: u64,
    /// Master accounting: dirty bytes.
    pub total_dirty: u64,
    /// Master accounting: used bytes.
    pub total_used: u64,
    /// Master accounting: dead bytes.
    pub total_dead: u64,
    /// Master accounting: dark bytes.
    pub total_dark: u64,
    /// Filesystem size per the superblock.
    pub fs_size: u64,
    /// Per-inode details.
    pub inodes: Vec<DeletedInodeInfo>,
}

/// Builds the recoverability report by scanning the volume.
#[must_use]
pub fn volume_report(ubifs: &Ubifs<'_>) -> VolumeReport {
    let mut scanned = AllCollector::default();
    ubifs.scan_volume(&mut scanned);

    let mut report = VolumeReport {
        total_free: ubifs.master().total_free,
        total_dirty: ubifs.master().total_dirty,
        total_used: ubifs.master().total_used,
        total_dead: ubifs.master().total_dead,
        total_dark: ubifs.master().total_dark,
        fs_size: ubifs.fs_size(),
        ..VolumeReport::default()
    };

    for (inum, ino) in &scanned.inodes {
        if ino.nlink != 0 || !ino.ch.crc_ok {
            continue;
        }
        let data_nodes =
            scanned.data_nodes.get(inum).map(|nodes| nodes.len() as u64).unwrap_or(0);
        // The estimator assumes full 4 KiB blocks on purpose; per-node
        // sizes are not consulted.
        let recoverable = (data_nodes * UBIFS_BLOCK_SIZE as u64).min(ino.size);
        let name = scanned
            .dent_sequence
            .iter()
            .find(|dent| dent.inum == *inum)
            .map(|dent| dent.name_str());

        report.deleted_inodes += 1;
        report.deleted_bytes += ino.size;
        report.recoverable_bytes += recoverable;
        report.inodes.push(DeletedInodeInfo {
            inum: *inum,
            size: ino.size,
            data_nodes,
            recoverable,
            name,
        });
    }
    report
}

/// Formats a byte count the way humans read sizes.
#[must_use]
pub fn readable_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PiB")
}

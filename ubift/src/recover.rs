//! The recovery pipeline: from parsed volumes to files on disk.
//!
//! Directories are materialised along their unrolled dent paths, regular
//! files are rebuilt from their data nodes block by block, and, when
//! deleted recovery is requested, a full-volume scan resurrects inodes the
//! live index no longer references. Output paths never trust on-disk names:
//! separators and dot-dot components are neutralised up front, and a path
//! the OS still rejects is retried once through a portable sanitiser.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use ubift_media::key::{Key, KeyType};
use ubift_media::node::{DataNode, DentNode, InoNode, InodeType, Node, UBIFS_BLOCK_SIZE};

use crate::compress::decompress;
use crate::image::Image;
use crate::partition::{PartitionKind, UbiPartitioner};
use crate::ubi::{Ubi, UbiVolume};
use crate::ubifs::{Ubifs, UbifsOptions};
use crate::visitor::AllCollector;
use crate::{Error, Result};

/// Subdirectory recovered deleted files are written to.
pub const RECOVERED_FILES_DIR: &str = "UBIFT_RECOVERED_FILES";
/// File name of a raw volume dump when no UBIFS is found.
pub const RAW_VOLUME_DUMP: &str = "RAW_UBI_VOL_DATA.bin";
/// Name prefix for recovered inodes no directory entry names.
pub const RECOVERED_INODE_PREFIX: &str = "RECOVERED_INODE_DATA_";

/// Volume-name characters carried into the output directory name.
const VOLNAME_CHARS: usize = 10;
/// Path-unrolling depth guard against dent cycles in corrupt images.
const MAX_PATH_DEPTH: usize = 255;

/// Cooperative cancellation handle, checked between per-file extractions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options for a recovery run.
#[derive(Debug, Clone, Default)]
pub struct RecoverOptions {
    /// Also recover inodes absent from the live index (scan based).
    pub deleted: bool,
    /// Dump raw volume bytes when a volume holds no UBIFS.
    pub raw: bool,
    /// Master-node selection forwarded to [`UbifsOptions`].
    pub masternode_index: usize,
    /// Cancellation handle.
    pub cancel: CancelToken,
}

/// Counters of one recovery run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverySummary {
    /// Volumes that held a UBIFS instance.
    pub volumes: u64,
    /// Directories created.
    pub directories: u64,
    /// Live files written.
    pub files: u64,
    /// Deleted inodes resurrected.
    pub deleted_recovered: u64,
    /// Raw volume dumps written.
    pub raw_dumps: u64,
}

impl RecoverySummary {
    /// Folds another summary into this one.
    fn absorb(&mut self, other: Self) {
        self.volumes += other.volumes;
        self.directories += other.directories;
        self.files += other.files;
        self.deleted_recovered += other.deleted_recovered;
        self.raw_dumps += other.raw_dumps;
    }
}

/// Recovers every UBI volume of the image into `out_dir`.
///
/// Output layout: `ubi_<i>/ubi_<i>_<j>_<volname>/...` with `i` the UBI
/// instance ordinal and `j` the volume index.
pub fn recover_image(image: &Image, out_dir: &Path, options: &RecoverOptions) -> Result<RecoverySummary> {
    let mut summary = RecoverySummary::default();
    let partitions = UbiPartitioner::new().partition(image, false);
    let ubi_partitions = partitions.iter().filter(|p| p.kind() == PartitionKind::Ubi);

    for (i, partition) in ubi_partitions.enumerate() {
        let ubi = Ubi::new(image, *partition);
        let instance_dir = out_dir.join(format!("ubi_{i}"));
        for volume in ubi.volumes() {
            let short_name: String = volume.name().chars().take(VOLNAME_CHARS).collect();
            let volume_dir =
                instance_dir.join(format!("ubi_{i}_{}_{}", volume.index(), short_name));
            fs::create_dir_all(&volume_dir)?;

            match Ubifs::new(volume, UbifsOptions { masternode_index: options.masternode_index }) {
                Ok(ubifs) => {
                    summary.volumes += 1;
                    summary.absorb(recover_volume(&ubifs, &volume_dir, options)?);
                }
                Err(err @ (Error::MissingSuperblock { .. } | Error::MissingMaster { .. })) => {
                    tracing::error!(volume = %volume.name(), %err, "volume holds no UBIFS");
                    if options.raw {
                        dump_raw_volume(volume, &volume_dir)?;
                        summary.raw_dumps += 1;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(summary)
}

/// Recovers one UBIFS volume into `out_dir`.
pub fn recover_volume(
    ubifs: &Ubifs<'_>,
    out_dir: &Path,
    options: &RecoverOptions,
) -> Result<RecoverySummary> {
    let mut summary = RecoverySummary::default();
    let mut live = AllCollector::default();
    ubifs.traverse(&mut live);
    let by_own_inum = first_dent_per_inum(&live.dents);

    // Directories first, so files land inside stamped trees.
    for dent in &live.dent_sequence {
        if dent.is_deletion() || dent.inode_type() != Some(InodeType::Dir) {
            continue;
        }
        let path = out_dir.join(unroll_path(dent, &by_own_inum));
        match create_dir_with_retry(&path) {
            Ok(path) => {
                summary.directories += 1;
                if let Some(ino) = live.inodes.get(&dent.inum) {
                    stamp_metadata(&path, ino, true);
                }
            }
            Err(err) => tracing::warn!(path = %path.display(), %err, "cannot create directory"),
        }
    }

    for dent in &live.dent_sequence {
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if dent.is_deletion() {
            continue;
        }
        match dent.inode_type() {
            Some(InodeType::Reg) => {
                let ino = live.inodes.get(&dent.inum);
                let empty = Vec::new();
                let data = live.data_nodes.get(&dent.inum).unwrap_or(&empty);
                let bytes = rebuild_bytes(ino, data);
                let path = unique_path(out_dir.join(unroll_path(dent, &by_own_inum)));
                match write_with_retry(&path, &bytes) {
                    Ok(path) => {
                        summary.files += 1;
                        if let Some(ino) = ino {
                            stamp_metadata(&path, ino, false);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "cannot write file")
                    }
                }
            }
            Some(InodeType::Dir) => {}
            Some(other) => {
                tracing::warn!(
                    name = %dent.name_str(),
                    ?other,
                    "special inode type is not extracted"
                );
            }
            None => {
                tracing::warn!(name = %dent.name_str(), dtype = dent.dtype, "unknown inode type")
            }
        }
    }

    if options.deleted {
        summary.deleted_recovered = recover_deleted(ubifs, out_dir, options, &live)?;
    }
    Ok(summary)
}

/// Scans the volume and resurrects every inode the live index lost.
fn recover_deleted(
    ubifs: &Ubifs<'_>,
    out_dir: &Path,
    options: &RecoverOptions,
    live: &AllCollector<'_>,
) -> Result<u64> {
    let mut scanned = AllCollector::default();
    ubifs.scan_volume(&mut scanned);

    let target_dir = out_dir.join(RECOVERED_FILES_DIR);
    fs::create_dir_all(&target_dir)?;

    let mut recovered = 0u64;
    for (inum, ino) in &scanned.inodes {
        if options.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if live.inodes.contains_key(inum) {
            continue;
        }
        // Only CRC-clean inode nodes are trusted for resurrection.
        if !ino.ch.crc_ok {
            tracing::warn!(inum, "scanned inode fails its CRC, not recovering");
            continue;
        }
        if (ino.mode & 0o170_000) == 0o040_000 {
            continue;
        }

        let name = scanned
            .dent_sequence
            .iter()
            .find(|dent| dent.inum == *inum)
            .map(|dent| safe_component(&dent.name_str()))
            .unwrap_or_else(|| format!("{RECOVERED_INODE_PREFIX}{inum}"));
        let empty = Vec::new();
        let data = scanned.data_nodes.get(inum).unwrap_or(&empty);
        let bytes = rebuild_bytes(Some(ino), data);
        let path = unique_path(target_dir.join(name));
        match write_with_retry(&path, &bytes) {
            Ok(path) => {
                recovered += 1;
                stamp_metadata(&path, ino, false);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot write recovered file")
            }
        }
    }
    tracing::info!(recovered, "deleted-inode recovery finished");
    Ok(recovered)
}

/// Writes the concatenated LEB data of a volume with no UBIFS in it.
fn dump_raw_volume(volume: &UbiVolume<'_>, out_dir: &Path) -> Result<()> {
    let mut raw = Vec::new();
    for lnum in volume.lebs().keys() {
        if let Some(data) = volume.leb_data(*lnum) {
            raw.extend_from_slice(data);
        }
    }
    fs::write(out_dir.join(RAW_VOLUME_DUMP), raw)?;
    Ok(())
}

/// Rebuilds an inode's byte stream from its data nodes.
///
/// Each node's decompressed payload lands at `4096 * block_index`; gaps are
/// holes. The stream is then reconciled against the inode size: shorter
/// streams are extended, longer ones are kept with an error logged.
#[must_use]
pub fn rebuild_bytes(ino: Option<&InoNode<'_>>, data_nodes: &[DataNode<'_>]) -> Vec<u8> {
    let mut nodes: Vec<&DataNode<'_>> = data_nodes.iter().collect();
    // Older versions of a block sort first and are overwritten.
    nodes.sort_by_key(|node| (node.key.payload, node.ch.sqnum));

    let mut out = Vec::new();
    for node in nodes {
        let offset = node.key.payload as usize * UBIFS_BLOCK_SIZE;
        let chunk = decompress(node.data, node.compr_type, node.size as usize);
        let end = offset + chunk.len();
        if out.len() < end {
            out.resize(end, 0);
        }
        out[offset..end].copy_from_slice(&chunk);
    }

    if let Some(ino) = ino {
        let size = ino.size as usize;
        if out.len() < size {
            out.resize(size, 0);
        } else if out.len() > size {
            tracing::error!(
                inum = ino.key.inum,
                ino_size = size,
                accumulated = out.len(),
                "data nodes exceed the inode size; keeping the larger content"
            );
        }
    }
    out
}

/// Rebuilds an inode's bytes through the live index.
#[must_use]
pub fn index_inode_bytes<'a>(ubifs: &Ubifs<'a>, inum: u32) -> Option<Vec<u8>> {
    let ino = match ubifs.find(Key::ino(inum)) {
        Some(Node::Ino(ino)) => Some(ino),
        _ => None,
    };
    let data_nodes: Vec<DataNode<'a>> = ubifs
        .find_range(Key::data(inum, 0), Key::new(inum, KeyType::Dent, 0))
        .into_iter()
        .filter_map(|node| match node {
            Node::Data(data) => Some(data),
            _ => None,
        })
        .collect();
    if ino.is_none() && data_nodes.is_empty() {
        return None;
    }
    Some(rebuild_bytes(ino.as_ref(), &data_nodes))
}

/// Rebuilds an inode's bytes from a full-volume scan.
#[must_use]
pub fn scanned_inode_bytes(ubifs: &Ubifs<'_>, inum: u32) -> Option<Vec<u8>> {
    let mut scanned = AllCollector::default();
    ubifs.scan_volume(&mut scanned);
    let ino = scanned.inodes.get(&u64::from(inum));
    let data_nodes = scanned.data_nodes.get(&u64::from(inum));
    if ino.is_none() && data_nodes.is_none() {
        return None;
    }
    Some(rebuild_bytes(ino, data_nodes.map(Vec::as_slice).unwrap_or(&[])))
}

/// First directory entry per target inode, for parent lookups.
#[must_use]
pub fn first_dent_per_inum<'a>(
    dents: &BTreeMap<u64, Vec<DentNode<'a>>>,
) -> BTreeMap<u64, DentNode<'a>> {
    dents
        .iter()
        .filter_map(|(inum, list)| list.first().map(|dent| (*inum, *dent)))
        .collect()
}

/// Unrolls a dent to its path relative to the volume root.
///
/// `unroll(dent) = unroll(parent_dent) / name`; the recursion ends at the
/// root (parent inode 0) or, when the parent entry is gone, at the deepest
/// name still known.
#[must_use]
pub fn unroll_path(dent: &DentNode<'_>, by_own_inum: &BTreeMap<u64, DentNode<'_>>) -> PathBuf {
    let mut parts = vec![safe_component(&dent.name_str())];
    let mut parent = u64::from(dent.key.inum);
    let mut depth = 0usize;
    while parent != 0 {
        let Some(parent_dent) = by_own_inum.get(&parent) else {
            break;
        };
        parts.push(safe_component(&parent_dent.name_str()));
        parent = u64::from(parent_dent.key.inum);
        depth += 1;
        if depth > MAX_PATH_DEPTH {
            tracing::warn!(name = %dent.name_str(), "path unrolling hit the depth guard");
            break;
        }
    }
    parts.iter().rev().collect()
}

/// Neutralises a single on-disk name for use as one path component.
///
/// Separators become underscores and the dot names are replaced wholesale,
/// so hostile images cannot climb out of the output tree.
#[must_use]
pub fn safe_component(name: &str) -> String {
    if name.is_empty() || name == "." || name == ".." {
        return "_".to_owned();
    }
    name.chars().map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c }).collect()
}

/// Applies the portable sanitiser to every component of a relative path.
fn sanitise_path(path: &Path) -> PathBuf {
    path.iter()
        .map(|part| {
            let part = part.to_string_lossy();
            part.chars()
                .map(|c| match c {
                    '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
                    c if c.is_control() => '_',
                    c => c,
                })
                .collect::<String>()
        })
        .collect()
}

/// Appends `(N)` with the smallest `N` making the path unique.
fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for n in 1u32.. {
        let candidate = parent.join(format!("{name}({n})"));
        if !candidate.exists() {
            return candidate;
        }
    }
    path
}

/// Creates a directory tree, retrying once through the sanitiser.
fn create_dir_with_retry(path: &Path) -> std::io::Result<PathBuf> {
    match fs::create_dir_all(path) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "retrying with a sanitised path");
            let sanitised = sanitise_path(path);
            fs::create_dir_all(&sanitised)?;
            Ok(sanitised)
        }
    }
}

/// Writes a file, retrying once through the sanitiser.
fn write_with_retry(path: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::write(path, bytes) {
        Ok(()) => Ok(path.to_path_buf()),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "retrying with a sanitised path");
            let sanitised = sanitise_path(path);
            if let Some(parent) = sanitised.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&sanitised, bytes)?;
            Ok(sanitised)
        }
    }
}

/// Best-effort stamp of mode, mtime and atime from an inode node.
fn stamp_metadata(path: &Path, ino: &InoNode<'_>, is_dir: bool) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(ino.mode & 0o7777));
    }

    let times = fs::FileTimes::new()
        .set_accessed(epoch_time(ino.atime_sec, ino.atime_nsec))
        .set_modified(epoch_time(ino.mtime_sec, ino.mtime_nsec));
    let handle = if is_dir {
        fs::File::open(path)
    } else {
        fs::File::options().write(true).open(path)
    };
    if let Ok(handle) = handle {
        let _ = handle.set_times(times);
    }
}

/// Converts an on-disk timestamp to a [`SystemTime`].
fn epoch_time(sec: u64, nsec: u32) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::new(sec, nsec.min(999_999_999))
}

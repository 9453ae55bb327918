//! Filesystem-level commands: fsstat, fls, ils, ffind, icat, istat, jls.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use ubift_media::key::Key;
use ubift_media::node::{DentNode, InodeType, Node};

use ubift::{
    AllCollector, DentXentCollector, Ubifs, first_dent_per_inum, index_inode_bytes, readable_size,
    related_deleted_entries, scanned_inode_bytes, unroll_path,
};

use crate::render::{FlsRow, IlsRow, OutputFormat, dump_bytes, print_fls, print_ils};
use crate::{ImageArgs, VolumeArgs, with_ubifs};

/// Collects leaves either from the index or from a full-volume scan.
fn collect<'a>(ubifs: &Ubifs<'a>, scan: bool) -> AllCollector<'a> {
    let mut collector = AllCollector::default();
    if scan {
        ubifs.scan_volume(&mut collector);
    } else {
        ubifs.traverse(&mut collector);
    }
    collector
}

/// Short label of a directory-entry target type.
fn type_label(dent: &DentNode<'_>) -> String {
    match dent.inode_type() {
        Some(InodeType::Reg) => "reg",
        Some(InodeType::Dir) => "dir",
        Some(InodeType::Lnk) => "lnk",
        Some(InodeType::Blk) => "blk",
        Some(InodeType::Chr) => "chr",
        Some(InodeType::Fifo) => "fifo",
        Some(InodeType::Sock) => "sock",
        None => "?",
    }
    .to_owned()
}

/// The display name of a dent: its name, or its unrolled path.
fn display_name(
    dent: &DentNode<'_>,
    by_own_inum: &BTreeMap<u64, DentNode<'_>>,
    full_paths: bool,
) -> String {
    if full_paths {
        unroll_path(dent, by_own_inum).display().to_string()
    } else {
        dent.name_str()
    }
}

pub fn fsstat(args: &ImageArgs, selector: &VolumeArgs) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let sb = ubifs.superblock();
        println!("UBIFS Superblock");
        println!("Format Version: {}", sb.fmt_version);
        println!("Min I/O Size: {}", sb.min_io_size);
        println!("LEB Size: {}", sb.leb_size);
        println!("LEB Count: {} (max {})", sb.leb_cnt, sb.max_leb_cnt);
        println!("Filesystem Size: {}", readable_size(ubifs.fs_size()));
        println!("Log LEBs: {}", sb.log_lebs);
        println!("LPT LEBs: {}", sb.lpt_lebs);
        println!("Orphan LEBs: {}", sb.orph_lebs);
        println!("Journal Heads: {}", sb.jhead_cnt);
        println!("Fanout: {}", sb.fanout);
        println!("Default Compression: {}", sb.default_compr);
        let uuid: String = sb.uuid.iter().map(|b| format!("{b:02x}")).collect();
        println!("UUID: {uuid}");
        println!();

        let master = ubifs.master();
        println!("Master Node (sqnum {})", master.ch.sqnum);
        println!("Commit Number: {}", master.cmt_no);
        println!("Highest Inode: {}", master.highest_inum);
        println!("Root Index: LEB {} offset {}", master.root_lnum, master.root_offs);
        println!("Log LEB: {}", master.log_lnum);
        println!(
            "Free: {} Dirty: {} Used: {} Dead: {} Dark: {}",
            readable_size(master.total_free),
            readable_size(master.total_dirty),
            readable_size(master.total_used),
            readable_size(master.total_dead),
            readable_size(master.total_dark)
        );
        println!("Orphaned Inodes: {}", ubifs.orphans().len());
        Ok(())
    })
}

#[allow(clippy::fn_params_excessive_bools)]
pub fn fls(
    args: &ImageArgs,
    selector: &VolumeArgs,
    full_paths: bool,
    xentries: bool,
    scan: bool,
    deleted: bool,
    format: OutputFormat,
) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let collector = collect(ubifs, scan);
        let by_own_inum = first_dent_per_inum(&collector.dents);

        let mut rows = Vec::new();
        if deleted {
            for group in related_deleted_entries(&collector.dents) {
                for peer in &group.peers {
                    rows.push(FlsRow {
                        entry_type: type_label(peer),
                        inode: peer.inum,
                        deleted: true,
                        name: display_name(peer, &by_own_inum, full_paths),
                    });
                }
                if group.peers.is_empty() {
                    rows.push(FlsRow {
                        entry_type: "?".to_owned(),
                        inode: 0,
                        deleted: true,
                        name: format!(
                            "<deleted name, parent {} hash {:#x}>",
                            group.parent_inum, group.name_hash
                        ),
                    });
                }
            }
        } else {
            for dent in collector.dents.values().flatten() {
                if dent.is_deletion() {
                    continue;
                }
                rows.push(FlsRow {
                    entry_type: type_label(dent),
                    inode: dent.inum,
                    deleted: false,
                    name: display_name(dent, &by_own_inum, full_paths),
                });
            }
            if xentries {
                let mut xcollector = DentXentCollector::default();
                if scan {
                    ubifs.scan_volume(&mut xcollector);
                } else {
                    ubifs.traverse(&mut xcollector);
                }
                for xent in xcollector.xents.values().flatten() {
                    rows.push(FlsRow {
                        entry_type: "xent".to_owned(),
                        inode: xent.inum,
                        deleted: false,
                        name: xent.name_str(),
                    });
                }
            }
        }
        print_fls(format, &rows)
    })
}

pub fn ils(
    args: &ImageArgs,
    selector: &VolumeArgs,
    scan: bool,
    deleted: bool,
    format: OutputFormat,
) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let collector = collect(ubifs, scan);
        let rows: Vec<IlsRow> = collector
            .inodes
            .iter()
            .filter(|(_, ino)| !deleted || ino.nlink == 0)
            .map(|(inum, ino)| IlsRow {
                inode: *inum,
                mode: format!("{:o}", ino.mode),
                uid: ino.uid,
                gid: ino.gid,
                size: ino.size,
                nlink: ino.nlink,
                mtime_sec: ino.mtime_sec,
                deleted: ino.nlink == 0,
            })
            .collect();
        print_ils(format, &rows)
    })
}

pub fn ffind(
    args: &ImageArgs,
    selector: &VolumeArgs,
    inode: u32,
    scan: bool,
    full_paths: bool,
) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let collector = collect(ubifs, scan);
        let by_own_inum = first_dent_per_inum(&collector.dents);
        let mut found = false;
        for dent in collector.dents.get(&u64::from(inode)).into_iter().flatten() {
            found = true;
            println!("{}", display_name(dent, &by_own_inum, full_paths));
        }
        if !found {
            bail!("no directory entry references inode {inode}");
        }
        Ok(())
    })
}

pub fn icat(
    args: &ImageArgs,
    selector: &VolumeArgs,
    inode: u32,
    scan: bool,
    output: Option<&Path>,
) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let bytes = if scan {
            scanned_inode_bytes(ubifs, inode)
        } else {
            index_inode_bytes(ubifs, inode)
        };
        let Some(bytes) = bytes else {
            bail!("inode {inode} not found");
        };
        match output {
            Some(path) => {
                std::fs::write(path, &bytes)?;
                eprintln!("wrote {} to {}", readable_size(bytes.len() as u64), path.display());
                Ok(())
            }
            None => dump_bytes(&bytes),
        }
    })
}

pub fn istat(args: &ImageArgs, selector: &VolumeArgs, inode: u32, scan: bool) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let ino = if scan {
            let collector = collect(ubifs, true);
            collector.inodes.get(&u64::from(inode)).copied()
        } else {
            match ubifs.find(Key::ino(inode)) {
                Some(Node::Ino(ino)) => Some(ino),
                _ => None,
            }
        };
        let Some(ino) = ino else {
            bail!("inode {inode} not found");
        };

        println!("Inode: {inode}");
        println!("Mode: {:o}", ino.mode);
        println!("Size: {}", ino.size);
        println!("Links: {}", ino.nlink);
        println!("Owner: {}:{}", ino.uid, ino.gid);
        println!("Compression: {}", ino.compr_type);
        println!("Xattrs: {} ({} bytes)", ino.xattr_cnt, ino.xattr_size);
        println!("Created (sqnum): {}", ino.creat_sqnum);
        println!("Accessed: {}.{:09}", ino.atime_sec, ino.atime_nsec);
        println!("Modified: {}.{:09}", ino.mtime_sec, ino.mtime_nsec);
        println!("Changed: {}.{:09}", ino.ctime_sec, ino.ctime_nsec);
        println!("Deleted: {}", if ino.nlink == 0 { "yes" } else { "no" });
        if ubifs.orphans().contains(&u64::from(inode)) {
            println!("Orphan: yes");
        }
        Ok(())
    })
}

pub fn jls(args: &ImageArgs, selector: &VolumeArgs) -> Result<()> {
    let image = args.open()?;
    with_ubifs(&image, selector, |ubifs| {
        let journal = ubifs.journal();
        println!("{:<6} {:>6} {:>8} {:>12} {:<6} {:>6}", "AREA", "LEB", "OFFS", "SQNUM", "TYPE", "LEN");
        for entry in &journal.log {
            println!(
                "{:<6} {:>6} {:>8} {:>12} {:<6} {:>6}",
                "log",
                entry.lnum,
                entry.offs,
                entry.ch.sqnum,
                entry.ch.kind().map_or("?".to_owned(), |kind| format!("{kind:?}")),
                entry.ch.len
            );
        }
        for bud in journal.buds.values() {
            for entry in &bud.entries {
                println!(
                    "{:<6} {:>6} {:>8} {:>12} {:<6} {:>6}",
                    bud.head.label(),
                    entry.lnum,
                    entry.offs,
                    entry.ch.sqnum,
                    entry.ch.kind().map_or("?".to_owned(), |kind| format!("{kind:?}")),
                    entry.ch.len
                );
            }
        }
        if let Some(cs) = journal.cs {
            println!();
            println!("Commit number: {}", cs.cmt_no);
        }
        Ok(())
    })
}

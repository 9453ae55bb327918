//! Recovery commands: ubift_recover and ubift_info.

use std::path::Path;

use anyhow::Result;
use ubift::{
    PartitionKind, RecoverOptions, Ubi, UbiPartitioner, Ubifs, UbifsOptions, readable_size,
    recover_image, volume_report,
};

use crate::ImageArgs;

pub fn recover(args: &ImageArgs, deleted: bool, raw: bool, output: &Path) -> Result<()> {
    let image = args.open()?;
    let options = RecoverOptions { deleted, raw, ..RecoverOptions::default() };
    let summary = recover_image(&image, output, &options)?;

    println!("Recovered into {}", output.display());
    println!("Volumes with UBIFS: {}", summary.volumes);
    println!("Directories: {}", summary.directories);
    println!("Files: {}", summary.files);
    if deleted {
        println!("Deleted files recovered: {}", summary.deleted_recovered);
    }
    if raw {
        println!("Raw volume dumps: {}", summary.raw_dumps);
    }
    Ok(())
}

pub fn info(args: &ImageArgs, inode_info: bool) -> Result<()> {
    let image = args.open()?;
    let partitions = UbiPartitioner::new().partition(&image, false);

    let mut printed = 0usize;
    for partition in partitions.iter().filter(|p| p.kind() == PartitionKind::Ubi) {
        let ubi = Ubi::new(&image, *partition);
        for volume in ubi.volumes() {
            let ubifs = match Ubifs::new(volume, UbifsOptions::default()) {
                Ok(ubifs) => ubifs,
                Err(err) => {
                    eprintln!("ubift: volume '{}': {err}", volume.name());
                    continue;
                }
            };
            let report = volume_report(&ubifs);
            printed += 1;

            println!("Volume '{}' (index {})", volume.name(), volume.index());
            println!(
                "Filesystem Size: {} ({} bytes)",
                readable_size(report.fs_size),
                report.fs_size
            );
            println!("Deleted Inodes: {}", report.deleted_inodes);
            println!(
                "Deleted Bytes: {} ({} bytes)",
                readable_size(report.deleted_bytes),
                report.deleted_bytes
            );
            println!(
                "Estimated Recoverable: {} ({} bytes)",
                readable_size(report.recoverable_bytes),
                report.recoverable_bytes
            );
            println!(
                "Master Totals: free {} dirty {} used {} dead {} dark {}",
                readable_size(report.total_free),
                readable_size(report.total_dirty),
                readable_size(report.total_used),
                readable_size(report.total_dead),
                readable_size(report.total_dark)
            );

            if inode_info && !report.inodes.is_empty() {
                println!();
                println!(
                    "{:>10} {:>12} {:>10} {:>12} NAME",
                    "INODE", "SIZE", "DATANODES", "RECOVERABLE"
                );
                for ino in &report.inodes {
                    println!(
                        "{:>10} {:>12} {:>10} {:>12} {}",
                        ino.inum,
                        ino.size,
                        ino.data_nodes,
                        ino.recoverable,
                        ino.name.as_deref().unwrap_or("-")
                    );
                }
            }
            println!();
        }
    }
    if printed == 0 {
        anyhow::bail!("no UBIFS volume found in the image");
    }
    Ok(())
}

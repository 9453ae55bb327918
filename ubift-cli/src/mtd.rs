//! Image-level commands: mtdls, mtdcat, pebcat.

use anyhow::{Result, bail};
use ubift::{UbiPartitioner, readable_size};

use crate::ImageArgs;
use crate::render::dump_bytes;

pub fn mtdls(args: &ImageArgs) -> Result<()> {
    let image = args.open()?;
    let partitions = UbiPartitioner::new().partition(&image, true);

    println!("MTD Image");
    println!();
    println!("Size: {}", readable_size(image.data().len() as u64));
    println!("Erase Block Size: {}", readable_size(u64::from(image.block_size())));
    println!("Page Size: {}", readable_size(u64::from(image.page_size())));
    println!("OOB Size: {} B", image.oob_size());
    println!();
    println!("Physical Erase Blocks: {}", image.peb_count());
    println!("Pages per Erase Block: {}", image.block_size() / image.page_size().max(1));
    println!();
    println!("Units are {} erase blocks", readable_size(u64::from(image.block_size())));
    println!("{:>4}  {:>10}  {:>10}  {:>10}  Description", "", "Start", "End", "Length");
    for (i, partition) in partitions.iter().enumerate() {
        let block = image.block_size() as usize;
        println!(
            "{i:>3}:  {:>10}  {:>10}  {:>10}  {}",
            partition.offset() / block,
            partition.end() / block,
            partition.len() / block,
            partition.kind().label()
        );
    }
    Ok(())
}

pub fn mtdcat(args: &ImageArgs, index: usize) -> Result<()> {
    let image = args.open()?;
    let partitions = UbiPartitioner::new().partition(&image, true);
    let Some(partition) = partitions.get(index) else {
        bail!("invalid partition index {index} ({} partitions)", partitions.len());
    };
    dump_bytes(partition.data(&image))
}

pub fn pebcat(args: &ImageArgs, index: u32) -> Result<()> {
    let image = args.open()?;
    let Some(peb) = image.peb(index) else {
        bail!("invalid physical erase block index {index} ({} blocks)", image.peb_count());
    };
    dump_bytes(peb)
}

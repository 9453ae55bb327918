//! UBI-level commands: ubils, lebls, lebcat, ubicat.

use anyhow::{Result, bail};
use ubift_media::ubi::{EcHeader, VidHeader};

use ubift::{PartitionKind, Ubi, UbiPartitioner, UbiVolume};

use crate::render::dump_bytes;
use crate::{ImageArgs, VolumeArgs, with_volume};

pub fn ubils(args: &ImageArgs) -> Result<()> {
    let image = args.open()?;
    let partitions = UbiPartitioner::new().partition(&image, false);
    let instances: Vec<Ubi<'_>> = partitions
        .iter()
        .filter(|p| p.kind() == PartitionKind::Ubi)
        .map(|p| Ubi::new(&image, *p))
        .collect();

    println!("UBI Instances: {}", instances.len());
    println!();
    for (i, ubi) in instances.iter().enumerate() {
        println!("UBI Instance {i}");
        println!(
            "Physical Erase Blocks: {} (start: {} end: {})",
            ubi.partition().peb_count(&image),
            ubi.partition().offset(),
            ubi.partition().end()
        );
        println!("Volumes: {}", ubi.volumes().len());
        for volume in ubi.volumes() {
            let record = volume.record();
            println!();
            println!("Volume {}", volume.index());
            println!("Name: {}", volume.name());
            println!("Reserved PEBs: {}", record.reserved_pebs);
            println!("Alignment: {}", record.alignment);
            println!("Data Pad: {}", record.data_pad);
            let vol_type = match record.vol_type {
                1 => "DYNAMIC",
                2 => "STATIC",
                _ => "UNKNOWN",
            };
            println!("Volume Type: {vol_type}");
            println!("Update Marker: {}", record.upd_marker);
            println!("Flags: {}", record.flags);
            println!("CRC: {:#010x}", record.crc);
        }
        println!();
    }
    Ok(())
}

pub fn lebls(args: &ImageArgs, selector: &VolumeArgs) -> Result<()> {
    let image = args.open()?;
    with_volume(&image, selector, |volume| {
        println!("UBI Volume Index: {} Name: {}", volume.index(), volume.name());
        println!();
        println!("{:>6}  --->  {:>6}", "LEB", "PEB");
        for (lnum, leb) in volume.lebs() {
            println!("{lnum:>6}  --->  {:>6}", leb.peb);
        }
        Ok(())
    })
}

pub fn lebcat(args: &ImageArgs, selector: &VolumeArgs, leb: u32, headers: bool) -> Result<()> {
    let image = args.open()?;
    with_volume(&image, selector, |volume| {
        if !volume.is_mapped(leb) {
            bail!("LEB {leb} is not mapped in volume '{}'", volume.name());
        }
        if headers {
            print_leb_headers(volume, leb)
        } else {
            let data = volume
                .leb_data(leb)
                .ok_or_else(|| anyhow::anyhow!("LEB {leb} data out of range"))?;
            dump_bytes(data)
        }
    })
}

pub fn ubicat(args: &ImageArgs, selector: &VolumeArgs, headers: bool) -> Result<()> {
    let image = args.open()?;
    with_volume(&image, selector, |volume| {
        let lnums: Vec<u32> = volume.lebs().keys().copied().collect();
        for lnum in lnums {
            if headers {
                print_leb_headers(volume, lnum)?;
            } else if let Some(data) = volume.leb_data(lnum) {
                dump_bytes(data)?;
            }
        }
        Ok(())
    })
}

/// Prints the EC and VID headers backing one mapped LEB.
fn print_leb_headers(volume: &UbiVolume<'_>, lnum: u32) -> Result<()> {
    let image = volume.image();
    let leb = volume.lebs()[&lnum];
    let base = volume.partition().offset() + leb.peb as usize * image.block_size() as usize;

    let ec = EcHeader::parse(image.data(), base)?;
    println!(
        "LEB {lnum} -> PEB {}: ec={} vid_hdr_offset={} data_offset={} image_seq={:#x} crc_ok={}",
        leb.peb,
        ec.ec,
        ec.vid_hdr_offset,
        ec.data_offset,
        ec.image_seq,
        ec.hdr_crc_ok()
    );
    let vid = VidHeader::parse(image.data(), base + ec.vid_hdr_offset as usize)?;
    println!(
        "  vid: vol_id={:#x} lnum={} vol_type={} sqnum={} crc_ok={}",
        vid.vol_id,
        vid.lnum,
        vid.vol_type,
        vid.sqnum,
        vid.hdr_crc_ok()
    );
    Ok(())
}

//! The UBI volume-management layer.
//!
//! A [`Ubi`] instance is parsed out of one UBI partition: every PEB's
//! erase-counter header is read, mapped PEBs (those with a valid volume-id
//! header) are grouped by volume, and the volume table from the internal
//! layout volume materialises the user volumes. When wear-leveling left two
//! PEBs claiming the same logical block, the higher sequence number wins.

use std::collections::BTreeMap;

use ubift_media::ubi::{
    EcHeader, UBI_LAYOUT_VOLUME_ID, UBI_MAX_VOLUMES, UBI_VTBL_RECORD_SIZE, VidHeader, VtblRecord,
};

use crate::image::Image;
use crate::partition::Partition;

/// One mapped logical erase block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leb {
    /// PEB backing this LEB, relative to the UBI instance.
    pub peb: u32,
    /// Byte offset of the data area inside the PEB.
    pub data_offset: u32,
    /// Sequence number of the winning volume-id header.
    pub sqnum: u64,
}

/// A UBI instance inside one partition.
#[derive(Debug)]
pub struct Ubi<'a> {
    image: &'a Image,
    partition: Partition,
    volumes: Vec<UbiVolume<'a>>,
}

/// A PEB mapped into some volume, keyed for the volume build.
#[derive(Debug, Clone, Copy)]
struct MappedPeb {
    peb: u32,
    lnum: u32,
    sqnum: u64,
    data_offset: u32,
}

impl<'a> Ubi<'a> {
    /// Parses the UBI instance occupying `partition`.
    #[must_use]
    pub fn new(image: &'a Image, partition: Partition) -> Self {
        let mut groups: BTreeMap<u32, Vec<MappedPeb>> = BTreeMap::new();
        let data = image.data();
        let block_size = image.block_size() as usize;

        for peb in 0..partition.peb_count(image) {
            let base = partition.offset() + peb as usize * block_size;
            let ec = match EcHeader::parse(data, base) {
                Ok(ec) => ec,
                Err(err) => {
                    tracing::debug!(peb, %err, "PEB without erase-counter header");
                    continue;
                }
            };
            if !ec.hdr_crc_ok() {
                tracing::warn!(peb, "erase-counter header CRC mismatch, skipping PEB");
                continue;
            }
            let vid = match VidHeader::parse(data, base + ec.vid_hdr_offset as usize) {
                Ok(vid) => vid,
                // No volume-id header: the PEB is erased or unmapped.
                Err(_) => continue,
            };
            if !vid.hdr_crc_ok() {
                tracing::warn!(peb, "volume-id header CRC mismatch, skipping PEB");
                continue;
            }
            groups.entry(vid.vol_id).or_default().push(MappedPeb {
                peb,
                lnum: vid.lnum,
                sqnum: vid.sqnum,
                data_offset: ec.data_offset,
            });
        }

        let volumes = match groups.get(&UBI_LAYOUT_VOLUME_ID) {
            Some(layout) => Self::parse_volume_table(image, partition, layout, &groups),
            None => {
                tracing::error!(
                    offset = partition.offset(),
                    "no layout volume in the UBI instance; volumes cannot be parsed"
                );
                Vec::new()
            }
        };

        tracing::info!(
            offset = partition.offset(),
            volumes = volumes.len(),
            "initialized UBI instance"
        );
        Self { image, partition, volumes }
    }

    /// Reads the 128 volume-table records from the first layout-volume PEB
    /// and materialises a volume per in-use record.
    fn parse_volume_table(
        image: &'a Image,
        partition: Partition,
        layout: &[MappedPeb],
        groups: &BTreeMap<u32, Vec<MappedPeb>>,
    ) -> Vec<UbiVolume<'a>> {
        let first = layout[0];
        let table_base = partition.offset()
            + first.peb as usize * image.block_size() as usize
            + first.data_offset as usize;

        let mut volumes = Vec::new();
        for index in 0..UBI_MAX_VOLUMES {
            let at = table_base + index * UBI_VTBL_RECORD_SIZE;
            let record = match VtblRecord::parse(image.data(), at) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(index, %err, "unreadable volume-table record");
                    break;
                }
            };
            if !record.in_use() {
                continue;
            }
            if !record.crc_ok() {
                tracing::warn!(index, "volume-table record CRC mismatch, skipping");
                continue;
            }
            let pebs = groups.get(&(index as u32)).map(Vec::as_slice).unwrap_or(&[]);
            volumes.push(UbiVolume::new(image, partition, index as u32, record, pebs));
        }
        volumes
    }

    /// The image this instance was parsed from.
    #[must_use]
    pub fn image(&self) -> &'a Image {
        self.image
    }

    /// The partition this instance occupies.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// First physical erase block of the instance inside the image.
    #[must_use]
    pub fn peb_offset(&self) -> u32 {
        self.partition.peb_offset(self.image)
    }

    /// The user volumes of this instance.
    #[must_use]
    pub fn volumes(&self) -> &[UbiVolume<'a>] {
        &self.volumes
    }

    /// Looks a volume up by name.
    #[must_use]
    pub fn volume_by_name(&self, name: &str) -> Option<&UbiVolume<'a>> {
        self.volumes.iter().find(|volume| volume.name() == name)
    }

    /// Looks a volume up by volume-table index.
    #[must_use]
    pub fn volume_by_index(&self, index: u32) -> Option<&UbiVolume<'a>> {
        self.volumes.iter().find(|volume| volume.index() == index)
    }
}

/// One user volume: a volume-table record plus its LEB mapping.
#[derive(Debug, Clone)]
pub struct UbiVolume<'a> {
    image: &'a Image,
    partition: Partition,
    index: u32,
    record: VtblRecord,
    lebs: BTreeMap<u32, Leb>,
}

impl<'a> UbiVolume<'a> {
    /// Builds the volume, resolving `(vol_id, lnum)` conflicts by sequence
    /// number.
    fn new(
        image: &'a Image,
        partition: Partition,
        index: u32,
        record: VtblRecord,
        pebs: &[MappedPeb],
    ) -> Self {
        let mut lebs: BTreeMap<u32, Leb> = BTreeMap::new();
        for mapped in pebs {
            let candidate =
                Leb { peb: mapped.peb, data_offset: mapped.data_offset, sqnum: mapped.sqnum };
            match lebs.get(&mapped.lnum) {
                Some(existing) if existing.sqnum >= candidate.sqnum => {
                    tracing::debug!(
                        lnum = mapped.lnum,
                        loser = candidate.peb,
                        winner = existing.peb,
                        "discarding superseded LEB copy"
                    );
                }
                _ => {
                    lebs.insert(mapped.lnum, candidate);
                }
            }
        }
        tracing::info!(index, name = %record.name(), lebs = lebs.len(), "created UBI volume");
        Self { image, partition, index, record, lebs }
    }

    /// Volume-table index (equals the volume id).
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The volume name from its table record.
    #[must_use]
    pub fn name(&self) -> String {
        self.record.name()
    }

    /// The volume-table record.
    #[must_use]
    pub fn record(&self) -> &VtblRecord {
        &self.record
    }

    /// The image this volume lives in.
    #[must_use]
    pub fn image(&self) -> &'a Image {
        self.image
    }

    /// The partition of the owning UBI instance.
    #[must_use]
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// The LEB map, ordered by logical block number.
    #[must_use]
    pub fn lebs(&self) -> &BTreeMap<u32, Leb> {
        &self.lebs
    }

    /// Whether `lnum` is mapped.
    #[must_use]
    pub fn is_mapped(&self, lnum: u32) -> bool {
        self.lebs.contains_key(&lnum)
    }

    /// The data bytes of LEB `lnum`, if mapped.
    #[must_use]
    pub fn leb_data(&self, lnum: u32) -> Option<&'a [u8]> {
        let leb = self.lebs.get(&lnum)?;
        let base = self.partition.offset()
            + leb.peb as usize * self.image.block_size() as usize;
        self.image
            .data()
            .get(base + leb.data_offset as usize..base + self.image.block_size() as usize)
    }

    /// LEB size in bytes; constant across a volume.
    #[must_use]
    pub fn leb_size(&self) -> u32 {
        match self.lebs.values().next() {
            Some(leb) => self.image.block_size() - leb.data_offset,
            // No mapped LEB to read it from: assume the usual two header pages.
            None => self.image.block_size() - 2 * self.image.page_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageGeometry;
    use crate::partition::{PartitionKind, UbiPartitioner};
    use ubift_media::ubi::UBI_VID_DYNAMIC;

    const BLOCK: usize = 8192;
    const PAGE: u32 = 512;

    /// Writes a sealed EC header at the given PEB.
    fn put_ec(data: &mut [u8], peb: usize) {
        let mut ec = EcHeader {
            version: 1,
            ec: 1,
            vid_hdr_offset: PAGE,
            data_offset: PAGE * 2,
            image_seq: 1,
            hdr_crc: 0,
        };
        ec.seal();
        data[peb * BLOCK..peb * BLOCK + 64].copy_from_slice(&ec.to_bytes());
    }

    /// Writes a sealed VID header mapping `peb` to `(vol_id, lnum)`.
    fn put_vid(data: &mut [u8], peb: usize, vol_id: u32, lnum: u32, sqnum: u64) {
        let mut vid = VidHeader {
            version: 1,
            vol_type: UBI_VID_DYNAMIC,
            copy_flag: 0,
            compat: 0,
            vol_id,
            lnum,
            data_size: 0,
            used_ebs: 0,
            data_pad: 0,
            data_crc: 0,
            sqnum,
            hdr_crc: 0,
        };
        vid.seal();
        let at = peb * BLOCK + PAGE as usize;
        data[at..at + 64].copy_from_slice(&vid.to_bytes());
    }

    /// Writes a volume-table record into the layout PEB.
    fn put_vtbl_record(data: &mut [u8], layout_peb: usize, slot: usize, name: &str, pebs: u32) {
        let mut buf = [0u8; 128];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        let mut record = VtblRecord {
            reserved_pebs: pebs,
            alignment: 1,
            data_pad: 0,
            vol_type: UBI_VID_DYNAMIC,
            upd_marker: 0,
            name_len: name.len() as u16,
            name: buf,
            flags: 0,
            crc: 0,
        };
        record.seal();
        let at = layout_peb * BLOCK + (PAGE as usize) * 2 + slot * UBI_VTBL_RECORD_SIZE;
        data[at..at + UBI_VTBL_RECORD_SIZE].copy_from_slice(&record.to_bytes());
    }

    fn open(data: Vec<u8>) -> Image {
        Image::open(
            data,
            ImageGeometry { block_size: Some(BLOCK as u32), page_size: Some(PAGE), oob_size: 0 },
        )
        .unwrap()
    }

    #[test]
    fn volume_table_yields_volumes() {
        let mut data = vec![0u8; 6 * BLOCK];
        for peb in 0..6 {
            put_ec(&mut data, peb);
        }
        put_vid(&mut data, 0, UBI_LAYOUT_VOLUME_ID, 0, 1);
        put_vtbl_record(&mut data, 0, 0, "linux", 5);
        put_vid(&mut data, 1, 0, 0, 2);
        put_vid(&mut data, 2, 0, 1, 3);

        let image = open(data);
        let partitions = UbiPartitioner::new().partition(&image, false);
        assert_eq!(partitions[0].kind(), PartitionKind::Ubi);
        let ubi = Ubi::new(&image, partitions[0]);

        assert_eq!(ubi.volumes().len(), 1);
        let volume = ubi.volume_by_name("linux").unwrap();
        assert_eq!(volume.index(), 0);
        assert_eq!(volume.record().reserved_pebs, 5);
        assert_eq!(volume.record().vol_type, UBI_VID_DYNAMIC);
        assert_eq!(volume.lebs().len(), 2);
        assert_eq!(volume.leb_size(), BLOCK as u32 - 2 * PAGE);
        assert!(volume.leb_data(0).is_some());
        assert!(volume.leb_data(7).is_none());
        assert!(ubi.volume_by_index(1).is_none());
    }

    #[test]
    fn missing_layout_volume_yields_no_volumes() {
        let mut data = vec![0u8; 2 * BLOCK];
        put_ec(&mut data, 0);
        put_ec(&mut data, 1);

        let image = open(data);
        let partitions = UbiPartitioner::new().partition(&image, false);
        let ubi = Ubi::new(&image, partitions[0]);
        assert!(ubi.volumes().is_empty());
    }

    #[test]
    fn higher_sqnum_wins_a_mapping_conflict() {
        let mut data = vec![0u8; 4 * BLOCK];
        for peb in 0..4 {
            put_ec(&mut data, peb);
        }
        put_vid(&mut data, 0, UBI_LAYOUT_VOLUME_ID, 0, 1);
        put_vtbl_record(&mut data, 0, 0, "v", 3);
        // Both PEB 1 and PEB 2 claim LEB 0; PEB 2 has the higher sqnum.
        put_vid(&mut data, 1, 0, 0, 5);
        put_vid(&mut data, 2, 0, 0, 9);

        let image = open(data);
        // The duplicate (0, 0) pair would split the partition walk; hand the
        // whole range in as one partition to model a stale copy instead.
        let whole = Partition::new(&image, 0, 4 * BLOCK, PartitionKind::Ubi);
        let ubi = Ubi::new(&image, whole);

        let volume = ubi.volume_by_index(0).unwrap();
        assert_eq!(volume.lebs().len(), 1);
        assert_eq!(volume.lebs()[&0].peb, 2);
        assert_eq!(volume.lebs()[&0].sqnum, 9);
    }

    #[test]
    fn corrupt_vid_header_unmaps_the_peb() {
        let mut data = vec![0u8; 3 * BLOCK];
        for peb in 0..3 {
            put_ec(&mut data, peb);
        }
        put_vid(&mut data, 0, UBI_LAYOUT_VOLUME_ID, 0, 1);
        put_vtbl_record(&mut data, 0, 0, "v", 2);
        put_vid(&mut data, 1, 0, 0, 2);
        // Flip a byte inside the VID header of PEB 1: CRC must reject it.
        data[BLOCK + PAGE as usize + 9] ^= 0xff;

        let image = open(data);
        let whole = Partition::new(&image, 0, 3 * BLOCK, PartitionKind::Ubi);
        let ubi = Ubi::new(&image, whole);
        let volume = ubi.volume_by_index(0).unwrap();
        assert!(volume.lebs().is_empty());
    }
}

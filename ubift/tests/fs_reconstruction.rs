//! End-to-end reconstruction over a synthetic UBI/UBIFS image: geometry,
//! partitions, volumes, and the index and scan engines.

mod common;

use common::{BLOCK, DELETED_INUM, LEB_SIZE, PAGE, build_fs_image};
use ubift::{
    AllCollector, Image, ImageGeometry, InodeDentCollector, JournalHead, PartitionKind, Ubi,
    UbiPartitioner, Ubifs, UbifsOptions,
};
use ubift_media::key::{Key, KeyType};
use ubift_media::node::Node;

/// Opens the canonical test image with geometry left to inference.
fn open_image() -> Image {
    let fs = build_fs_image();
    Image::open(fs.data, ImageGeometry::default()).unwrap()
}

#[test]
fn geometry_is_inferred_from_the_image() {
    let image = open_image();
    assert_eq!(image.page_size(), PAGE);
    assert_eq!(image.block_size(), BLOCK as u32);
    assert_eq!(image.peb_count(), 16);
}

#[test]
fn the_image_partitions_into_one_ubi_instance() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, true);
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].kind(), PartitionKind::Ubi);
    assert_eq!(partitions[0].offset(), 0);
    assert_eq!(partitions[0].end(), 16 * BLOCK);
}

#[test]
fn the_volume_table_materialises_the_linux_volume() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);

    assert_eq!(ubi.volumes().len(), 1);
    let volume = ubi.volume_by_name("linux").unwrap();
    assert_eq!(volume.index(), 0);
    assert_eq!(volume.record().reserved_pebs, 14);
    assert_eq!(volume.lebs().len(), 12);
    assert_eq!(volume.leb_size() as usize, LEB_SIZE);
    // The layout volume itself is not exposed.
    assert!(ubi.volume_by_index(0x7fff_efff).is_none());
}

#[test]
fn the_ubifs_instance_resolves_its_anchors() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let sb = ubifs.superblock();
    assert_eq!(sb.leb_size as usize, LEB_SIZE);
    assert_eq!(sb.leb_cnt, 16);
    assert_eq!(sb.log_lebs, 2);
    assert_eq!(ubifs.fs_size(), 16 * LEB_SIZE as u64);

    // Master selection: the newest node of LEB 1, not the stale one.
    assert_eq!(ubifs.master().ch.sqnum, 100);
    assert_eq!(ubifs.master().root_lnum, 9);
    assert_eq!(ubifs.masters()[0].len(), 2);
    assert_eq!(ubifs.masters()[1].len(), 1);

    // The orphan area names the deleted inode.
    assert_eq!(ubifs.orphans(), &[u64::from(DELETED_INUM)]);
}

#[test]
fn a_stale_master_can_be_selected_explicitly() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();

    let ubifs = Ubifs::new(volume, UbifsOptions { masternode_index: 1 }).unwrap();
    assert_eq!(ubifs.master().ch.sqnum, 40);
    assert_eq!(ubifs.master().cmt_no, 4);

    let err = Ubifs::new(volume, UbifsOptions { masternode_index: 9 }).unwrap_err();
    assert!(matches!(err, ubift::Error::InvalidMasterIndex { index: 9, available: 2 }));
}

#[test]
fn the_journal_surfaces_cs_refs_and_buds() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let journal = ubifs.journal();
    assert_eq!(journal.cs.unwrap().cmt_no, 5);
    assert_eq!(journal.log.len(), 2);

    let reference = journal.refs.get(&JournalHead::Base).unwrap();
    assert_eq!(reference.lnum, 8);
    let bud = journal.buds.get(&JournalHead::Base).unwrap();
    assert_eq!(bud.lnum, 8);
    assert_eq!(bud.entries.len(), 1);
    assert_eq!(bud.entries[0].ch.sqnum, 200);
}

#[test]
fn point_lookup_walks_the_index() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    match ubifs.find(Key::ino(65)) {
        Some(Node::Ino(ino)) => {
            assert_eq!(ino.size, 11);
            assert_eq!(ino.nlink, 1);
        }
        other => panic!("expected inode 65, got {other:?}"),
    }

    match ubifs.find(Key::dent(1, b"hello.txt")) {
        Some(Node::Dent(dent)) => {
            assert_eq!(dent.inum, 65);
            assert_eq!(dent.name_str(), "hello.txt");
        }
        other => panic!("expected the hello.txt dent, got {other:?}"),
    }

    // Exact-match discipline: a key between existing keys returns nothing.
    assert!(ubifs.find(Key::ino(63)).is_none());
    // A key beyond every branch descends the last branch and still misses.
    assert!(ubifs.find(Key::ino(1000)).is_none());
    // The deleted inode is not reachable through the index.
    assert!(ubifs.find(Key::ino(DELETED_INUM)).is_none());
}

#[test]
fn range_lookup_returns_the_directory_entries() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let dents = ubifs.find_range(
        Key::new(1, KeyType::Dent, 0),
        Key::new(1, KeyType::Xent, 0),
    );
    let mut names: Vec<String> = dents
        .iter()
        .filter_map(|node| match node {
            Node::Dent(dent) => Some(dent.name_str()),
            _ => None,
        })
        .collect();
    names.sort();
    assert_eq!(names, ["docs", "hello.txt"]);

    // Data range of inode 65: exactly one block.
    let data = ubifs.find_range(Key::data(65, 0), Key::new(65, KeyType::Dent, 0));
    assert_eq!(data.len(), 1);
}

#[test]
fn traversal_collects_only_the_live_tree() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let mut live = InodeDentCollector::default();
    ubifs.traverse(&mut live);

    let inums: Vec<u64> = live.inodes.keys().copied().collect();
    assert_eq!(inums, [1, 64, 65, 66]);
    assert!(live.dents.contains_key(&64));
    assert!(live.dents.contains_key(&65));
    assert!(live.dents.contains_key(&66));
    assert!(!live.inodes.contains_key(&u64::from(DELETED_INUM)));
}

#[test]
fn scanning_reaches_the_deleted_nodes() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let mut scanned = AllCollector::default();
    ubifs.scan_volume(&mut scanned);

    let deleted = scanned.inodes.get(&u64::from(DELETED_INUM)).unwrap();
    assert_eq!(deleted.nlink, 0);
    assert_eq!(deleted.size, 6000);
    assert!(deleted.ch.crc_ok);

    let dents = scanned.dents.get(&u64::from(DELETED_INUM)).unwrap();
    assert_eq!(dents[0].name_str(), "note.txt");

    let data = scanned.data_nodes.get(&u64::from(DELETED_INUM)).unwrap();
    assert_eq!(data.len(), 2);

    // The deletion marker is in there too.
    let markers = scanned.dents.get(&0).unwrap();
    assert!(markers.iter().any(|dent| dent.key == Key::dent(1, b"note.txt")));
}

#[test]
fn deletion_markers_cluster_with_their_victims() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let mut scanned = AllCollector::default();
    ubifs.scan_volume(&mut scanned);

    let groups = ubift::related_deleted_entries(&scanned.dents);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].parent_inum, 1);
    assert!(groups[0].peers.iter().any(|peer| peer.inum == u64::from(DELETED_INUM)));
}

#[test]
fn scanning_an_unmapped_leb_finds_nothing() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let mut collector = AllCollector::default();
    ubifs.scan_leb(99, &mut collector);
    assert!(collector.inodes.is_empty());
    assert!(collector.dents.is_empty());
    assert!(collector.data_nodes.is_empty());
}

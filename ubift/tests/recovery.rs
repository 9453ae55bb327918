//! Recovery-pipeline integration: live extraction, deleted-file
//! resurrection, accounting, and cancellation.

mod common;

use common::{DELETED_INUM, DELETED_SIZE, build_fs_image};
use ubift::{
    CancelToken, Image, ImageGeometry, RECOVERED_FILES_DIR, RecoverOptions, Ubi, UbiPartitioner,
    Ubifs, UbifsOptions, index_inode_bytes, recover_image, scanned_inode_bytes, volume_report,
};

fn open_image() -> Image {
    let fs = build_fs_image();
    Image::open(fs.data, ImageGeometry::default()).unwrap()
}

#[test]
fn live_tree_is_extracted_with_contents() {
    let image = open_image();
    let out = tempfile::tempdir().unwrap();

    let summary = recover_image(&image, out.path(), &RecoverOptions::default()).unwrap();
    assert_eq!(summary.volumes, 1);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.directories, 1);
    assert_eq!(summary.deleted_recovered, 0);

    let volume_dir = out.path().join("ubi_0").join("ubi_0_0_linux");
    assert!(volume_dir.is_dir());
    assert_eq!(std::fs::read(volume_dir.join("hello.txt")).unwrap(), b"hello world");
    assert!(volume_dir.join("docs").is_dir());
    assert_eq!(std::fs::read(volume_dir.join("docs").join("deep.txt")).unwrap(), b"deep");
    // No deleted recovery requested: the subtree must not exist.
    assert!(!volume_dir.join(RECOVERED_FILES_DIR).exists());
}

#[test]
fn deleted_recovery_rebuilds_the_unlinked_file() {
    let image = open_image();
    let out = tempfile::tempdir().unwrap();

    let options = RecoverOptions { deleted: true, ..RecoverOptions::default() };
    let summary = recover_image(&image, out.path(), &options).unwrap();
    assert_eq!(summary.deleted_recovered, 1);

    let recovered = out
        .path()
        .join("ubi_0")
        .join("ubi_0_0_linux")
        .join(RECOVERED_FILES_DIR)
        .join("note.txt");
    let bytes = std::fs::read(&recovered).unwrap();
    assert_eq!(bytes.len(), DELETED_SIZE as usize);
    assert_eq!(&bytes[..5], b"hello");
    assert!(bytes[5..4096].iter().all(|&b| b == 0));
    assert_eq!(&bytes[4096..4101], b"world");
    assert!(bytes[4101..].iter().all(|&b| b == 0));
}

#[test]
fn file_metadata_is_stamped() {
    let image = open_image();
    let out = tempfile::tempdir().unwrap();
    recover_image(&image, out.path(), &RecoverOptions::default()).unwrap();

    let hello = out.path().join("ubi_0").join("ubi_0_0_linux").join("hello.txt");
    let metadata = std::fs::metadata(&hello).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(metadata.permissions().mode() & 0o7777, 0o644);
    }
    let mtime = metadata.modified().unwrap();
    let expected = std::time::SystemTime::UNIX_EPOCH
        + std::time::Duration::from_secs(1_600_000_001);
    assert_eq!(mtime, expected);
}

#[test]
fn cancellation_stops_before_files_are_written() {
    let image = open_image();
    let out = tempfile::tempdir().unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let options = RecoverOptions { cancel, ..RecoverOptions::default() };
    let err = recover_image(&image, out.path(), &options).unwrap_err();
    assert!(matches!(err, ubift::Error::Cancelled));

    let volume_dir = out.path().join("ubi_0").join("ubi_0_0_linux");
    assert!(!volume_dir.join("hello.txt").exists());
}

#[test]
fn inode_bytes_resolve_via_index_and_scan() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    assert_eq!(index_inode_bytes(&ubifs, 65).unwrap(), b"hello world");
    // The deleted inode only resolves through the scan engine.
    assert!(index_inode_bytes(&ubifs, DELETED_INUM).is_none());
    let bytes = scanned_inode_bytes(&ubifs, DELETED_INUM).unwrap();
    assert_eq!(bytes.len(), DELETED_SIZE as usize);
    assert_eq!(&bytes[..5], b"hello");
}

#[test]
fn the_report_accounts_for_deleted_bytes() {
    let image = open_image();
    let partitions = UbiPartitioner::new().partition(&image, false);
    let ubi = Ubi::new(&image, partitions[0]);
    let volume = ubi.volume_by_name("linux").unwrap();
    let ubifs = Ubifs::new(volume, UbifsOptions::default()).unwrap();

    let report = volume_report(&ubifs);
    assert_eq!(report.deleted_inodes, 1);
    assert_eq!(report.deleted_bytes, DELETED_SIZE);
    // Two data nodes survive: min(2 * 4096, 6000) = 6000.
    assert_eq!(report.recoverable_bytes, DELETED_SIZE);
    assert_eq!(report.fs_size, ubifs.fs_size());
    assert_eq!(report.total_used, 65536);
    assert_eq!(report.inodes.len(), 1);
    assert_eq!(report.inodes[0].inum, u64::from(DELETED_INUM));
    assert_eq!(report.inodes[0].name.as_deref(), Some("note.txt"));
}

use inodb_core::{
    FileMode, IndexConfig, InodeInfo, Locator, OwnerKind, PathId, Record, ScanError, Scheme,
    UNKNOWN_INODE,
};
use std::path::PathBuf;

#[test]
fn test_path_id_ordering() {
    let id1 = PathId::new(1);
    let id2 = PathId::new(2);

    assert!(id1 < id2);
    assert_eq!(id1, PathId(1));
}

#[test]
fn test_inode_info() {
    let inode1 = InodeInfo::new(12345, 67890);
    assert_eq!(inode1.inode, 12345);
    assert_eq!(inode1.device, 67890);

    let inode2 = InodeInfo::new(12345, 67890);
    assert_eq!(inode1, inode2);
    assert_ne!(inode1, InodeInfo::new(12345, 1));
}

#[test]
fn test_record_with_metadata() {
    let mut record = Record::new(
        "report.nc",
        InodeInfo::new(1511828760656, 9),
        InodeInfo::new(1511828541626, 9),
        1_700_000_000.5,
    );
    record.size = Some(315973404);
    record.mode = Some(0o100_644);
    record.uid = Some(5424);
    record.gid = Some(5608);
    record.links = Some(1);

    assert!(record.has_metadata());
    assert!(!record.is_dir());
    assert!(record.file_mode().is_some_and(FileMode::is_file));
    assert_eq!(record.parent().inode, 1511828541626);
    assert_eq!(record.basename.as_str(), "report.nc");
}

#[test]
fn test_unreadable_record_sentinel() {
    let record = Record::new(
        "locked",
        InodeInfo::new(UNKNOWN_INODE, 3),
        InodeInfo::new(100, 3),
        1.0,
    );
    assert!(!record.has_metadata());
    assert_eq!(record.inode, UNKNOWN_INODE);
    assert!(record.size.is_none());
}

#[test]
fn test_record_serializes() {
    let mut record = Record::new("a", InodeInfo::new(2, 1), InodeInfo::new(1, 1), 5.0);
    record.size = Some(4096);

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["basename"], "a");
    assert_eq!(json["size"], 4096);
    assert!(json["uid"].is_null());

    let back: Record = serde_json::from_value(json).unwrap();
    assert_eq!(back, record);
}

#[test]
fn test_locator_dispatch_schemes() {
    let local = Locator::parse("/short/w35/data").unwrap();
    assert_eq!(local.scheme(), Scheme::File);
    assert_eq!(local.fs_path(), PathBuf::from("/short/w35/data").as_path());

    let tape = Locator::parse("TAPE://w35/saw562").unwrap();
    assert_eq!(tape.scheme(), Scheme::Tape);
    assert_eq!(tape.namespace(), Some("w35"));

    let parsed: Locator = "file:///short/w35/../w40".parse().unwrap();
    assert_eq!(parsed.path(), "/short/w40");
}

#[test]
fn test_locator_errors_are_scan_errors() {
    let err = Locator::parse("ftp://host/path").unwrap_err();
    assert!(matches!(err, ScanError::UnsupportedScheme { ref scheme } if scheme == "ftp"));
}

#[test]
fn test_default_config() {
    let config = IndexConfig::new("/tmp/inodb.sqlite");
    assert_eq!(config.database, PathBuf::from("/tmp/inodb.sqlite"));
    assert_eq!(config.batch_size, 5000);
    assert_eq!(config.channel_capacity, 16);
    assert_eq!(config.du_cache_capacity, 128);
    assert_eq!(config.threads, 0);
    assert_eq!(config.tape.program, PathBuf::from("mdss"));
    assert!(config.tags.is_empty());
}

#[test]
fn test_owner_kind_display() {
    assert_eq!(OwnerKind::User.to_string(), "user");
    assert_eq!(OwnerKind::Group.to_string(), "group");
}

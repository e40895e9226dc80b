//! Scan records and stored inventory rows.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Surrogate key of a row in the inventory's `paths` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathId(pub i64);

impl PathId {
    /// Create a new PathId from a raw row id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Surrogate key of a deduplicated path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasenameId(pub i64);

/// Filesystem identity of an entry at scan time.
///
/// Not unique on its own: hard links share the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeInfo {
    /// Inode number.
    pub inode: u64,
    /// Device ID.
    pub device: u64,
}

impl InodeInfo {
    /// Create new inode info.
    pub fn new(inode: u64, device: u64) -> Self {
        Self { inode, device }
    }
}

/// Inode number recorded when an entry could be listed but not stat-ed.
pub const UNKNOWN_INODE: u64 = 0;

/// Unix file mode bits as stored in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const TYPE_MASK: u32 = 0o170_000;
    pub const DIRECTORY: u32 = 0o040_000;
    pub const REGULAR: u32 = 0o100_000;
    pub const SYMLINK: u32 = 0o120_000;

    pub const SET_UID: u32 = 0o4000;
    pub const SET_GID: u32 = 0o2000;
    pub const STICKY: u32 = 0o1000;

    pub const GROUP_READ: u32 = 0o040;
    pub const GROUP_EXEC: u32 = 0o010;

    pub fn is_dir(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::DIRECTORY
    }

    pub fn is_file(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::REGULAR
    }

    pub fn is_symlink(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::SYMLINK
    }

    /// Permission and special bits without the file type.
    pub fn permissions(self) -> u32 {
        self.0 & 0o7777
    }
}

/// One filesystem entry as reported by a producer.
///
/// Row identity (`id`, `parent_id`, `basename_id`) is assigned later by the
/// reconciler. Metadata that could not be read is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entry name (single path component).
    pub basename: CompactString,
    /// Inode number, or [`UNKNOWN_INODE`].
    pub inode: u64,
    /// Device ID.
    pub device: u64,
    /// Inode of the containing directory.
    pub parent_inode: u64,
    /// Device of the containing directory.
    pub parent_device: u64,
    /// Size in bytes.
    pub size: Option<u64>,
    /// Modification time, seconds since the epoch.
    pub mtime: Option<f64>,
    /// Status change time, seconds since the epoch.
    pub ctime: Option<f64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    /// Hard link count.
    pub links: Option<u64>,
    /// Time of the scan pass that produced this record.
    pub last_seen: f64,
}

impl Record {
    /// Create a record with only identity fields set.
    pub fn new(
        basename: impl Into<CompactString>,
        identity: InodeInfo,
        parent: InodeInfo,
        last_seen: f64,
    ) -> Self {
        Self {
            basename: basename.into(),
            inode: identity.inode,
            device: identity.device,
            parent_inode: parent.inode,
            parent_device: parent.device,
            size: None,
            mtime: None,
            ctime: None,
            uid: None,
            gid: None,
            mode: None,
            links: None,
            last_seen,
        }
    }

    /// Identity of this entry.
    pub fn identity(&self) -> InodeInfo {
        InodeInfo::new(self.inode, self.device)
    }

    /// Identity of the containing directory.
    pub fn parent(&self) -> InodeInfo {
        InodeInfo::new(self.parent_inode, self.parent_device)
    }

    pub fn file_mode(&self) -> Option<FileMode> {
        self.mode.map(FileMode)
    }

    /// Check if this record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.file_mode().is_some_and(FileMode::is_dir)
    }

    /// Whether any stat metadata was obtained for this entry.
    pub fn has_metadata(&self) -> bool {
        self.mode.is_some()
    }
}

/// A stored inventory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub id: PathId,
    /// Containing entry; `None` for scan roots and unresolved orphans.
    pub parent_id: Option<PathId>,
    pub basename_id: BasenameId,
    pub name: CompactString,
    pub inode: u64,
    pub device: u64,
    pub parent_inode: u64,
    pub parent_device: u64,
    pub size: Option<u64>,
    pub mtime: Option<f64>,
    pub ctime: Option<f64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub links: Option<u64>,
    pub last_seen: f64,
}

impl PathEntry {
    pub fn identity(&self) -> InodeInfo {
        InodeInfo::new(self.inode, self.device)
    }

    pub fn is_dir(&self) -> bool {
        self.mode.map(FileMode).is_some_and(FileMode::is_dir)
    }
}

/// Human-readable origin of a scan root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPath {
    pub path_id: PathId,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_id() {
        let id = PathId::new(42);
        assert_eq!(id.0, 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_file_mode_types() {
        assert!(FileMode(0o040_755).is_dir());
        assert!(FileMode(0o100_644).is_file());
        assert!(FileMode(0o120_777).is_symlink());
        assert_eq!(FileMode(0o102_755).permissions(), 0o2755);
    }

    #[test]
    fn test_record_identity() {
        let record = Record::new("e", InodeInfo::new(7, 1), InodeInfo::new(3, 1), 10.0);
        assert_eq!(record.identity(), InodeInfo::new(7, 1));
        assert_eq!(record.parent(), InodeInfo::new(3, 1));
        assert!(!record.has_metadata());
        assert!(!record.is_dir());
    }
}

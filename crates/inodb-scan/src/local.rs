//! JWalk-based parallel walker over a local filesystem.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use compact_str::CompactString;
use jwalk::{DirEntry, DirEntryIter, Parallelism, WalkDir};
use tracing::{debug, warn};

use inodb_core::{InodeInfo, Locator, Record, ScanError, Scheme, UNKNOWN_INODE};

use crate::producer::{Producer, RecordStream};

/// Producer for `file://` locators and bare paths.
#[derive(Debug, Clone, Default)]
pub struct LocalProducer {
    threads: usize,
}

impl LocalProducer {
    /// Create a producer walking with `threads` rayon workers (0 = auto).
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    fn parallelism(&self) -> Result<Parallelism, ScanError> {
        match self.threads {
            0 => Ok(Parallelism::RayonDefaultPool {
                busy_timeout: std::time::Duration::from_millis(100),
            }),
            n => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("inodb-walk-{i}"))
                    .build()
                    .map_err(|e| ScanError::Other {
                        message: format!("cannot start walker pool: {e}"),
                    })?;
                Ok(Parallelism::RayonExistingPool {
                    pool: Arc::new(pool),
                    busy_timeout: None,
                })
            }
        }
    }
}

impl Producer for LocalProducer {
    fn scheme(&self) -> Scheme {
        Scheme::File
    }

    fn root_identity(&self, locator: &Locator) -> Result<Option<InodeInfo>, ScanError> {
        match std::fs::metadata(locator.fs_path()) {
            Ok(metadata) => Ok(Some(identity_of(&metadata))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScanError::io(locator.fs_path(), e)),
        }
    }

    fn produce(&self, locator: &Locator, scan_time: f64) -> Result<RecordStream, ScanError> {
        let root = locator.fs_path().to_path_buf();
        let metadata = std::fs::metadata(&root).map_err(|e| ScanError::io(&root, e))?;
        let identity = identity_of(&metadata);

        // The root's parent is recorded but never walked.
        let parent = match std::fs::metadata(root.join("..")) {
            Ok(m) => identity_of(&m),
            Err(e) => {
                debug!(path = %root.display(), error = %e, "Cannot stat parent of scan root");
                identity
            }
        };

        let name = root
            .file_name()
            .map(repair_name)
            .unwrap_or_else(|| CompactString::new(root.to_string_lossy()));
        let root_record = record_from_metadata(name, parent, &metadata, scan_time);

        let mut dirs = HashMap::new();
        dirs.insert(root.clone(), identity);

        let walker = WalkDir::new(&root)
            .parallelism(self.parallelism()?)
            .skip_hidden(false)
            .follow_links(false)
            .sort(true)
            .min_depth(0)
            .into_iter();

        Ok(Box::new(LocalWalk {
            root_record: Some(root_record),
            walker,
            dirs,
            scan_time,
        }))
    }
}

/// Streaming state of one local walk.
struct LocalWalk {
    root_record: Option<Record>,
    walker: DirEntryIter<((), ())>,
    /// Identity of every directory yielded so far, keyed by path.
    dirs: HashMap<PathBuf, InodeInfo>,
    scan_time: f64,
}

impl LocalWalk {
    fn parent_identity(&mut self, parent: &Path) -> Option<InodeInfo> {
        if let Some(identity) = self.dirs.get(parent) {
            return Some(*identity);
        }
        match std::fs::metadata(parent) {
            Ok(m) => {
                let identity = identity_of(&m);
                self.dirs.insert(parent.to_path_buf(), identity);
                Some(identity)
            }
            Err(e) => {
                warn!(path = %parent.display(), error = %e, "Cannot stat directory");
                None
            }
        }
    }

    fn record_for(&mut self, entry: &DirEntry<((), ())>) -> Option<Record> {
        if let Some(err) = &entry.read_children_error {
            warn!(path = %entry.path().display(), error = %err, "Cannot read directory");
        }
        if entry.depth == 0 {
            return None;
        }

        let path = entry.path();
        let parent = self.parent_identity(&entry.parent_path)?;
        let name = repair_name(&entry.file_name);

        match entry.metadata() {
            Ok(metadata) => {
                if metadata.is_dir() {
                    self.dirs.insert(path, identity_of(&metadata));
                }
                Some(record_from_metadata(name, parent, &metadata, self.scan_time))
            }
            Err(err) => match err.io_error().map(std::io::Error::kind) {
                Some(std::io::ErrorKind::NotFound) => {
                    debug!(path = %path.display(), "Entry vanished during scan");
                    None
                }
                Some(std::io::ErrorKind::PermissionDenied) => {
                    warn!(path = %path.display(), "Permission denied reading metadata");
                    Some(Record::new(
                        name,
                        InodeInfo::new(UNKNOWN_INODE, parent.device),
                        parent,
                        self.scan_time,
                    ))
                }
                _ => {
                    warn!(path = %path.display(), error = %err, "Cannot read metadata");
                    None
                }
            },
        }
    }
}

impl Iterator for LocalWalk {
    type Item = Result<Record, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.root_record.take() {
            return Some(Ok(root));
        }

        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    warn!(path = %path.display(), error = %err, "Walk error");
                    continue;
                }
            };

            if let Some(record) = self.record_for(&entry) {
                return Some(Ok(record));
            }
        }
    }
}

/// Replace bytes that are not valid UTF-8 with `\xNN` escapes.
pub(crate) fn repair_name(name: &OsStr) -> CompactString {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;

        let mut out = CompactString::default();
        for chunk in name.as_bytes().utf8_chunks() {
            out.push_str(chunk.valid());
            for byte in chunk.invalid() {
                out.push_str(&format!("\\x{byte:02x}"));
            }
        }
        out
    }

    #[cfg(not(unix))]
    {
        CompactString::new(name.to_string_lossy())
    }
}

fn record_from_metadata(
    name: CompactString,
    parent: InodeInfo,
    metadata: &std::fs::Metadata,
    scan_time: f64,
) -> Record {
    let mut record = Record::new(name, identity_of(metadata), parent, scan_time);
    record.size = Some(metadata.len());
    fill_unix_fields(&mut record, metadata);
    record
}

// Cross-platform metadata helpers

#[cfg(unix)]
fn identity_of(metadata: &std::fs::Metadata) -> InodeInfo {
    InodeInfo::new(metadata.ino(), metadata.dev())
}

#[cfg(not(unix))]
fn identity_of(_metadata: &std::fs::Metadata) -> InodeInfo {
    InodeInfo::new(UNKNOWN_INODE, 0)
}

#[cfg(unix)]
fn fill_unix_fields(record: &mut Record, metadata: &std::fs::Metadata) {
    record.mtime = Some(metadata.mtime() as f64 + metadata.mtime_nsec() as f64 / 1e9);
    record.ctime = Some(metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9);
    record.uid = Some(metadata.uid());
    record.gid = Some(metadata.gid());
    record.mode = Some(metadata.mode());
    record.links = Some(metadata.nlink());
}

#[cfg(not(unix))]
fn fill_unix_fields(record: &mut Record, metadata: &std::fs::Metadata) {
    record.mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        fs::create_dir(root.join("dir1")).unwrap();
        fs::create_dir(root.join("dir2")).unwrap();
        fs::create_dir(root.join("dir1/subdir")).unwrap();

        fs::write(root.join("file1.txt"), "hello").unwrap();
        fs::write(root.join("dir1/file2.txt"), "world world world").unwrap();
        fs::write(root.join("dir1/subdir/file3.txt"), "test").unwrap();
        fs::write(root.join("dir2/.hidden"), "another file here").unwrap();

        temp
    }

    fn scan(root: &Path) -> Vec<Record> {
        let locator = Locator::local(root).unwrap();
        LocalProducer::new(2)
            .produce(&locator, 100.0)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_root_first_and_complete() {
        let temp = create_test_tree();
        let records = scan(temp.path());

        // root + 3 dirs + 4 files
        assert_eq!(records.len(), 8);
        let root = &records[0];
        assert!(root.is_dir());
        assert_eq!(
            root.identity(),
            identity_of(&fs::metadata(temp.path()).unwrap())
        );
        assert!(records.iter().all(|r| r.last_seen == 100.0));
        assert!(records.iter().any(|r| r.basename == ".hidden"));
    }

    #[test]
    fn test_parent_identity_links_children() {
        let temp = create_test_tree();
        let records = scan(temp.path());

        let dir1 = records.iter().find(|r| r.basename == "dir1").unwrap();
        let file2 = records.iter().find(|r| r.basename == "file2.txt").unwrap();
        let subdir = records.iter().find(|r| r.basename == "subdir").unwrap();

        assert_eq!(file2.parent(), dir1.identity());
        assert_eq!(subdir.parent(), dir1.identity());
        assert_eq!(dir1.parent(), records[0].identity());
        assert_eq!(file2.size, Some(17));
    }

    #[cfg(unix)]
    #[test]
    fn test_hard_links_share_identity() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("e"), "data").unwrap();
        fs::hard_link(temp.path().join("e"), temp.path().join("f")).unwrap();

        let records = scan(temp.path());
        let e = records.iter().find(|r| r.basename == "e").unwrap();
        let f = records.iter().find(|r| r.basename == "f").unwrap();
        assert_eq!(e.identity(), f.identity());
        assert_eq!(e.links, Some(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed() {
        let temp = create_test_tree();
        std::os::unix::fs::symlink(temp.path().join("dir1"), temp.path().join("link")).unwrap();

        let records = scan(temp.path());
        let link = records.iter().find(|r| r.basename == "link").unwrap();
        assert!(link.file_mode().unwrap().is_symlink());
        // dir1's contents appear once, not again under the link
        assert_eq!(records.iter().filter(|r| r.basename == "file2.txt").count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_default_pool_matches_dedicated_pool() {
        let temp = create_test_tree();
        let locator = Locator::local(temp.path()).unwrap();
        let names = |producer: LocalProducer| -> Vec<CompactString> {
            producer
                .produce(&locator, 1.0)
                .unwrap()
                .map(|r| r.unwrap().basename)
                .collect()
        };
        assert_eq!(names(LocalProducer::default()), names(LocalProducer::new(3)));
    }

    /// Walk `root` after applying `modes`, restoring 0o755 before returning.
    #[cfg(unix)]
    fn scan_with_modes(root: &Path, modes: &[(&str, u32)]) -> Vec<Record> {
        use std::os::unix::fs::PermissionsExt;

        for (dir, mode) in modes {
            fs::set_permissions(root.join(dir), fs::Permissions::from_mode(*mode)).unwrap();
        }
        let records = scan(root);
        for (dir, _) in modes {
            fs::set_permissions(root.join(dir), fs::Permissions::from_mode(0o755)).unwrap();
        }
        records
    }

    #[cfg(unix)]
    #[test]
    fn test_unlistable_directory_keeps_own_record() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let temp = TempDir::new().unwrap();
        for dir in ["closed", "search_only"] {
            fs::create_dir(temp.path().join(dir)).unwrap();
            fs::write(temp.path().join(dir).join("inside.txt"), "x").unwrap();
        }

        let records = scan_with_modes(temp.path(), &[("closed", 0o000), ("search_only", 0o300)]);

        let closed = records.iter().find(|r| r.basename == "closed").unwrap();
        assert!(closed.is_dir());
        assert_ne!(closed.inode, UNKNOWN_INODE);
        assert!(records.iter().any(|r| r.basename == "search_only"));
        assert!(!records.iter().any(|r| r.basename == "inside.txt"));
        assert_eq!(records.len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn test_unsearchable_directory_yields_unknown_children() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("listable");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("one"), "1").unwrap();
        fs::write(dir.join("two"), "22").unwrap();

        let records = scan_with_modes(temp.path(), &[("listable", 0o600)]);

        let listable = records.iter().find(|r| r.basename == "listable").unwrap();
        let children: Vec<_> = records
            .iter()
            .filter(|r| r.basename == "one" || r.basename == "two")
            .collect();
        assert_eq!(children.len(), 2);
        for child in children {
            assert_eq!(child.inode, UNKNOWN_INODE);
            assert_eq!(child.device, listable.device);
            assert_eq!(child.parent(), listable.identity());
            assert_eq!(child.mode, None);
            assert!(!child.has_metadata());
        }
    }

    #[test]
    fn test_repair_name() {
        use std::os::unix::ffi::OsStrExt;

        let name = OsStr::from_bytes(b"bad\xffname");
        assert_eq!(repair_name(name), "bad\\xffname");
        assert_eq!(repair_name(OsStr::new("plain")), "plain");
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let locator = Locator::local(temp.path().join("missing")).unwrap();
        let producer = LocalProducer::default();

        assert!(producer.root_identity(&locator).unwrap().is_none());
        assert!(matches!(
            producer.produce(&locator, 1.0),
            Err(ScanError::NotFound { .. })
        ));
    }
}

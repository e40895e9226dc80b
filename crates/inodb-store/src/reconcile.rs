//! Incremental reconciliation of scan records into the inventory.
//!
//! A scan pass runs three ordered steps per chunk of records, each chunk in
//! its own transaction:
//!
//! 1. basenames are added to the dictionary,
//! 2. records are upserted on `(basename, inode, device, parent_inode,
//!    parent_device)`, keeping the row id of entries seen before,
//! 3. rows without a parent are linked to the newest directory row carrying
//!    their parent identity; unresolved rows wait for later chunks.
//!
//! After the last chunk, [`Reconciler::finish`] sweeps every entry under the
//! scan root that this pass did not touch and records the root.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use compact_str::CompactString;
use rusqlite::{Connection, params};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use inodb_core::{BasenameId, FileMode, InodeInfo, Locator, PathId, Record, ScanError};

use crate::error::StoreError;
use crate::inventory::Inventory;
use crate::schema::{fill_id_table, from_sql_u64, to_sql_u64};
use crate::tree::TreeIndex;

const SWEEP_TABLE: &str = "sweep_scope";

/// Knobs for one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Records committed per transaction.
    pub batch_size: usize,
    /// Checked between chunks; a cancelled pass never sweeps.
    pub cancel: CancellationToken,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of a completed scan pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    /// Row of the scan root.
    pub root: PathId,
    /// Locator as recorded in `root_paths`.
    pub locator: String,
    /// `last_seen` stamp of this pass.
    pub scan_time: f64,
    /// Records received from the producer.
    pub records: u64,
    /// Rows created by this pass.
    pub inserted: u64,
    /// Rows removed by the staleness sweep.
    pub swept: u64,
    /// Rows left without a parent link.
    pub unresolved: usize,
    pub elapsed: Duration,
}

/// Rows awaiting a parent link.
#[derive(Debug, Clone, Copy)]
struct Pending {
    id: PathId,
    parent: InodeInfo,
}

/// Pass state produced by a committed chunk.
struct AppliedChunk {
    root: Option<PathId>,
    pending: Vec<Pending>,
    inserted: u64,
}

/// One scan pass over an [`Inventory`].
pub struct Reconciler<'a> {
    inventory: &'a mut Inventory,
    options: ReconcileOptions,
    scan_time: f64,
    started: Instant,
    root: Option<PathId>,
    pending: Vec<Pending>,
    names: HashMap<CompactString, BasenameId>,
    records: u64,
    inserted: u64,
}

impl<'a> Reconciler<'a> {
    /// Start a pass.
    ///
    /// The pass time is strictly later than any `last_seen` already stored,
    /// so entries touched by an earlier pass are always older than this one.
    pub fn begin(inventory: &'a mut Inventory, options: ReconcileOptions) -> Result<Self, StoreError> {
        let now = inodb_core::now_timestamp();
        let scan_time = match inventory.latest_last_seen()? {
            Some(latest) if latest >= now => latest + 1e-6,
            _ => now,
        };
        debug!(scan_time, batch_size = options.batch_size, "Beginning reconciliation");

        Ok(Self {
            inventory,
            options,
            scan_time,
            started: Instant::now(),
            root: None,
            pending: Vec::new(),
            names: HashMap::new(),
            records: 0,
            inserted: 0,
        })
    }

    /// `last_seen` stamp applied to every record of this pass.
    pub fn scan_time(&self) -> f64 {
        self.scan_time
    }

    /// Row of the scan root, once the first record has been applied.
    pub fn root(&self) -> Option<PathId> {
        self.root
    }

    /// Reconcile a whole record stream and finish the pass.
    pub fn reconcile<I>(mut self, locator: &Locator, records: I) -> Result<ScanSummary, StoreError>
    where
        I: IntoIterator<Item = Result<Record, ScanError>>,
    {
        let batch_size = self.options.batch_size.max(1);
        let mut chunk = Vec::with_capacity(batch_size);
        for record in records {
            chunk.push(record?);
            if chunk.len() >= batch_size {
                self.check_cancelled()?;
                self.apply_chunk(&chunk)?;
                chunk.clear();
            }
        }
        self.check_cancelled()?;
        if !chunk.is_empty() {
            self.apply_chunk(&chunk)?;
        }
        self.finish(locator)
    }

    /// Apply pre-chunked records until the stream ends, without finishing.
    pub fn consume<I>(&mut self, chunks: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Result<Vec<Record>, ScanError>>,
    {
        for chunk in chunks {
            self.check_cancelled()?;
            self.apply_chunk(&chunk?)?;
        }
        self.check_cancelled()
    }

    fn check_cancelled(&self) -> Result<(), StoreError> {
        if self.options.cancel.is_cancelled() {
            warn!(records = self.records, "Scan cancelled; skipping sweep");
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    /// Apply one chunk in a single transaction.
    ///
    /// The pass state only advances once the transaction commits, so a
    /// failed chunk can be retried as if it had never been applied.
    pub fn apply_chunk(&mut self, chunk: &[Record]) -> Result<(), StoreError> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self.try_apply_chunk(chunk) {
            Ok(applied) => {
                self.root = applied.root;
                self.pending = applied.pending;
                self.records += chunk.len() as u64;
                self.inserted += applied.inserted;
                Ok(())
            }
            Err(e) => {
                // Rolled back: cached ids and tree changes may be stale.
                self.names.clear();
                self.inventory.reload_tree()?;
                Err(e)
            }
        }
    }

    fn try_apply_chunk(&mut self, chunk: &[Record]) -> Result<AppliedChunk, StoreError> {
        let Inventory { conn, tree, .. } = &mut *self.inventory;
        let tx = conn.unchecked_transaction()?;

        // 1. dictionary
        let mut basename_ids = Vec::with_capacity(chunk.len());
        for record in chunk {
            let id = match self.names.get(&record.basename) {
                Some(id) => *id,
                None => {
                    let id = insert_basename(&tx, &record.basename)?;
                    self.names.insert(record.basename.clone(), id);
                    id
                }
            };
            basename_ids.push(id);
        }

        // 2. upsert
        let mut root = self.root;
        let mut inserted = 0;
        let mut fresh = Vec::new();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO paths
                     (basename_id, inode, device, parent_inode, parent_device,
                      size, mtime, ctime, uid, gid, mode, links, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT (basename_id, inode, device, parent_inode, parent_device)
                 DO UPDATE SET
                     size = excluded.size, mtime = excluded.mtime, ctime = excluded.ctime,
                     uid = excluded.uid, gid = excluded.gid, mode = excluded.mode,
                     links = excluded.links, last_seen = excluded.last_seen
                 RETURNING id, parent_id",
            )?;
            for (record, basename_id) in chunk.iter().zip(basename_ids) {
                let (id, parent_id) = stmt.query_row(
                    params![
                        basename_id.0,
                        to_sql_u64(record.inode),
                        to_sql_u64(record.device),
                        to_sql_u64(record.parent_inode),
                        to_sql_u64(record.parent_device),
                        record.size.map(to_sql_u64),
                        record.mtime,
                        record.ctime,
                        record.uid,
                        record.gid,
                        record.mode,
                        record.links.map(to_sql_u64),
                        self.scan_time,
                    ],
                    |row| Ok((PathId(row.get(0)?), row.get::<_, Option<i64>>(1)?.map(PathId))),
                )?;

                if !tree.contains(id) {
                    tree.insert(id, parent_id);
                    inserted += 1;
                }
                if parent_id.is_none() {
                    fresh.push(Pending {
                        id,
                        parent: record.parent(),
                    });
                }
                root.get_or_insert(id);
            }
        }

        // 3. link
        let mut pending = Vec::new();
        for candidate in self.pending.iter().chain(&fresh) {
            if !link_parent(&tx, tree, candidate)? {
                pending.push(*candidate);
            }
        }

        tx.commit()?;
        debug!(
            records = chunk.len(),
            linked = self.pending.len() + fresh.len() - pending.len(),
            pending = pending.len(),
            "Committed chunk"
        );
        Ok(AppliedChunk {
            root,
            pending,
            inserted,
        })
    }

    /// Sweep stale entries under the root, record the root, and bump the
    /// inventory generation.
    pub fn finish(mut self, locator: &Locator) -> Result<ScanSummary, StoreError> {
        let root = self.root.ok_or_else(|| StoreError::EmptyScan {
            locator: locator.to_string(),
        })?;
        let locator_text = locator.to_string();

        let result = sweep_and_record(&mut *self.inventory, root, self.scan_time, &locator_text);
        let swept = match result {
            Ok(swept) => swept,
            Err(e) => {
                self.inventory.reload_tree()?;
                return Err(e);
            }
        };
        self.inventory.bump_generation()?;

        let summary = ScanSummary {
            root,
            locator: locator_text,
            scan_time: self.scan_time,
            records: self.records,
            inserted: self.inserted,
            swept,
            unresolved: self.pending.iter().filter(|p| p.id != root).count(),
            elapsed: self.started.elapsed(),
        };
        info!(
            locator = %summary.locator,
            records = summary.records,
            inserted = summary.inserted,
            swept = summary.swept,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Scan complete"
        );
        Ok(summary)
    }
}

fn insert_basename(conn: &Connection, name: &str) -> Result<BasenameId, StoreError> {
    conn.prepare_cached("INSERT INTO basenames (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")?
        .execute(params![name])?;
    let id = conn
        .prepare_cached("SELECT id FROM basenames WHERE name = ?1")?
        .query_row(params![name], |row| row.get(0))?;
    Ok(BasenameId(id))
}

/// Link a parentless row to the newest directory carrying its parent
/// identity. Returns `false` if no acceptable parent exists yet.
fn link_parent(conn: &Connection, tree: &mut TreeIndex, pending: &Pending) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id FROM paths
         WHERE inode = ?1 AND device = ?2 AND id != ?3
           AND (mode IS NULL OR (mode & ?4) = ?5)
         ORDER BY last_seen DESC, id DESC",
    )?;
    let candidates = stmt
        .query_map(
            params![
                to_sql_u64(pending.parent.inode),
                to_sql_u64(pending.parent.device),
                pending.id.0,
                FileMode::TYPE_MASK,
                FileMode::DIRECTORY,
            ],
            |row| row.get::<_, i64>(0).map(PathId),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let Some(parent) = candidates
        .into_iter()
        .find(|candidate| !tree.would_cycle(pending.id, *candidate))
    else {
        return Ok(false);
    };

    conn.prepare_cached("UPDATE paths SET parent_id = ?1 WHERE id = ?2")?
        .execute(params![parent.0, pending.id.0])?;
    tree.link(pending.id, parent);
    Ok(true)
}

/// Re-link entries seen in this pass whose stored parent was not.
///
/// An entry keeps its row when only its parent directory's row changes,
/// e.g. after the scan root itself was renamed, so its old `parent_id`
/// still points at the superseded row. Returns the number of entries moved.
fn relink_moved(
    conn: &Connection,
    tree: &mut TreeIndex,
    root: PathId,
    scan_time: f64,
) -> Result<usize, StoreError> {
    let stranded: Vec<(PathId, PathId, InodeInfo)> = conn
        .prepare(
            "SELECT c.id, c.parent_id, c.parent_inode, c.parent_device
             FROM paths c JOIN paths p ON p.id = c.parent_id
             WHERE c.last_seen >= ?1 AND p.last_seen < ?1 AND c.id != ?2",
        )?
        .query_map(params![scan_time, root.0], |row| {
            Ok((
                PathId(row.get(0)?),
                PathId(row.get(1)?),
                InodeInfo::new(from_sql_u64(row.get(2)?), from_sql_u64(row.get(3)?)),
            ))
        })?
        .collect::<Result<_, _>>()?;

    let mut moved = 0;
    for (id, old_parent, parent) in stranded {
        if link_parent(conn, tree, &Pending { id, parent })? && tree.parent_of(id) != Some(old_parent) {
            moved += 1;
        }
    }
    Ok(moved)
}

/// Recorded roots that are older rows of the same directory as `root`.
fn superseded_roots(conn: &Connection, root: PathId) -> Result<Vec<PathId>, StoreError> {
    let ids = conn
        .prepare(
            "SELECT r.path_id FROM root_paths r
             JOIN paths old ON old.id = r.path_id
             JOIN paths new ON new.id = ?1
             WHERE old.inode = new.inode AND old.device = new.device AND old.id != new.id",
        )?
        .query_map(params![root.0], |row| row.get::<_, i64>(0).map(PathId))?
        .collect::<Result<_, _>>()?;
    Ok(ids)
}

/// Delete entries under `root` older than `scan_time` and record the root.
/// Returns the number of rows deleted.
fn sweep_and_record(
    inventory: &mut Inventory,
    root: PathId,
    scan_time: f64,
    locator: &str,
) -> Result<u64, StoreError> {
    let Inventory { conn, tree, .. } = inventory;
    let tx = conn.unchecked_transaction()?;

    let moved = relink_moved(&tx, tree, root, scan_time)?;
    let mut scope = vec![root];
    scope.extend(superseded_roots(&tx, root)?);
    if moved > 0 || scope.len() > 1 {
        debug!(root = %root, moved, superseded = scope.len() - 1, "Re-linked moved entries");
    }

    fill_id_table(&tx, SWEEP_TABLE, tree.descendants_of(&scope))?;
    let stale: Vec<PathId> = tx
        .prepare(&format!(
            "SELECT p.id FROM paths p JOIN {SWEEP_TABLE} s ON s.id = p.id WHERE p.last_seen < ?1"
        ))?
        .query_map(params![scan_time], |row| row.get::<_, i64>(0).map(PathId))?
        .collect::<Result<_, _>>()?;

    let stale_set: HashSet<PathId> = stale.iter().copied().collect();
    let mut orphans = Vec::new();
    {
        let mut delete_path = tx.prepare_cached("DELETE FROM paths WHERE id = ?1")?;
        let mut delete_root = tx.prepare_cached("DELETE FROM root_paths WHERE path_id = ?1")?;
        let mut detach = tx.prepare_cached("UPDATE paths SET parent_id = NULL WHERE parent_id = ?1")?;
        for id in &stale {
            delete_path.execute(params![id.0])?;
            delete_root.execute(params![id.0])?;
            detach.execute(params![id.0])?;
            orphans.extend(tree.remove(*id).into_iter().filter(|c| !stale_set.contains(c)));
        }
    }

    // Fresh entries whose old parent row went away follow the directory
    // that replaced it, if any.
    for id in orphans {
        let parent: (i64, i64) = tx
            .prepare_cached("SELECT parent_inode, parent_device FROM paths WHERE id = ?1")?
            .query_row(params![id.0], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let pending = Pending {
            id,
            parent: InodeInfo::new(from_sql_u64(parent.0), from_sql_u64(parent.1)),
        };
        if !link_parent(&tx, tree, &pending)? {
            debug!(id = %id, "Entry left without a parent after sweep");
        }
    }

    tx.execute(
        "INSERT INTO root_paths (path_id, path) VALUES (?1, ?2) ON CONFLICT (path_id) DO NOTHING",
        params![root.0, locator],
    )?;
    tx.commit()?;

    debug!(root = %root, swept = stale.len(), "Sweep complete");
    Ok(stale.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(name: &str, inode: u64, parent: u64) -> Record {
        let mut record = Record::new(name, InodeInfo::new(inode, 1), InodeInfo::new(parent, 1), 0.0);
        record.mode = Some(0o040_755);
        record.size = Some(4096);
        record
    }

    fn file(name: &str, inode: u64, parent: u64, size: u64) -> Record {
        let mut record = Record::new(name, InodeInfo::new(inode, 1), InodeInfo::new(parent, 1), 0.0);
        record.mode = Some(0o100_644);
        record.size = Some(size);
        record
    }

    fn run(inventory: &mut Inventory, records: Vec<Record>, batch_size: usize) -> ScanSummary {
        run_at(inventory, "/data/a", records, batch_size)
    }

    fn run_at(inventory: &mut Inventory, path: &str, records: Vec<Record>, batch_size: usize) -> ScanSummary {
        let locator = Locator::parse(path).unwrap();
        let options = ReconcileOptions {
            batch_size,
            ..Default::default()
        };
        Reconciler::begin(inventory, options)
            .unwrap()
            .reconcile(&locator, records.into_iter().map(Ok))
            .unwrap()
    }

    #[test]
    fn test_children_before_parents_are_linked_later() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        // Child arrives in the first chunk, its directory in the second.
        let records = vec![dir("a", 10, 1), file("x", 12, 11, 5), dir("b", 11, 10)];
        let summary = run(&mut inventory, records, 2);

        assert_eq!(summary.records, 3);
        assert_eq!(summary.unresolved, 0);
        let x = inventory.resolve_identity(InodeInfo::new(12, 1)).unwrap().unwrap();
        let b = inventory.resolve_identity(InodeInfo::new(11, 1)).unwrap().unwrap();
        assert_eq!(inventory.parent_of(x), Some(b));
        assert_eq!(inventory.full_path(x).unwrap(), "/data/a/b/x");
    }

    #[test]
    fn test_scan_time_strictly_increases() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        let first = run(&mut inventory, vec![dir("a", 10, 1)], 10);
        let second = run(&mut inventory, vec![dir("a", 10, 1)], 10);
        assert!(second.scan_time > first.scan_time);
        assert_eq!(first.root, second.root);
        assert_eq!(inventory.generation(), 2);
    }

    #[test]
    fn test_cancelled_pass_does_not_sweep() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        run(&mut inventory, vec![dir("a", 10, 1), file("old", 20, 10, 1)], 10);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = ReconcileOptions {
            batch_size: 10,
            cancel,
        };
        let locator = Locator::parse("/data/a").unwrap();
        let result = Reconciler::begin(&mut inventory, options)
            .unwrap()
            .reconcile(&locator, vec![Ok(dir("a", 10, 1))]);

        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.generation(), 1);
    }

    #[test]
    fn test_producer_error_aborts_without_sweep() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        run(&mut inventory, vec![dir("a", 10, 1), file("old", 20, 10, 1)], 10);

        let locator = Locator::parse("/data/a").unwrap();
        let records = vec![
            Ok(dir("a", 10, 1)),
            Err(ScanError::Other {
                message: "listing broke".to_string(),
            }),
        ];
        let result = Reconciler::begin(&mut inventory, ReconcileOptions::default())
            .unwrap()
            .reconcile(&locator, records);

        assert!(matches!(result, Err(StoreError::Scan(_))));
        assert_eq!(inventory.len(), 2);
    }

    #[test]
    fn test_empty_stream() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        let locator = Locator::parse("/data/a").unwrap();
        let result = Reconciler::begin(&mut inventory, ReconcileOptions::default())
            .unwrap()
            .reconcile(&locator, Vec::new());
        assert!(matches!(result, Err(StoreError::EmptyScan { .. })));
    }

    #[test]
    fn test_renamed_directory_keeps_children() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        run(
            &mut inventory,
            vec![dir("a", 10, 1), dir("x", 11, 10), file("f", 12, 11, 3)],
            10,
        );

        // x renamed to y: same inode, new basename.
        let summary = run(
            &mut inventory,
            vec![dir("a", 10, 1), dir("y", 11, 10), file("f", 12, 11, 3)],
            10,
        );

        assert_eq!(summary.swept, 1);
        let f = inventory.resolve_identity(InodeInfo::new(12, 1)).unwrap().unwrap();
        assert_eq!(inventory.full_path(f).unwrap(), "/data/a/y/f");
    }

    #[test]
    fn test_renamed_root_keeps_children() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        let tree = |root: &str| {
            vec![
                dir(root, 10, 1),
                file("g", 11, 10, 2),
                dir("sub", 12, 10),
                file("f", 13, 12, 3),
            ]
        };
        let first = run_at(&mut inventory, "/data/x", tree("x"), 10);

        // The root itself renamed: its row is replaced, its children's are not.
        let second = run_at(&mut inventory, "/data/y", tree("y"), 10);

        assert_ne!(first.root, second.root);
        assert_eq!(second.swept, 1);
        assert_eq!(inventory.len(), 4);
        assert_eq!(inventory.descendants(second.root).len(), 4);
        let f = inventory.resolve_identity(InodeInfo::new(13, 1)).unwrap().unwrap();
        assert_eq!(inventory.full_path(f).unwrap(), "/data/y/sub/f");

        let roots = inventory.root_paths().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path_id, second.root);
        assert_eq!(roots[0].path, "/data/y");
    }

    #[test]
    fn test_root_with_new_parent_identity_replaces_old_row() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        let first = run(&mut inventory, vec![dir("a", 10, 1), file("f", 11, 10, 3)], 10);
        let second = run(&mut inventory, vec![dir("a", 10, 2), file("f", 11, 10, 3)], 10);

        assert_ne!(first.root, second.root);
        assert_eq!(inventory.len(), 2);
        let f = inventory.resolve_identity(InodeInfo::new(11, 1)).unwrap().unwrap();
        assert_eq!(inventory.parent_of(f), Some(second.root));
        let roots = inventory.root_paths().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path_id, second.root);
    }

    #[test]
    fn test_failed_chunk_can_be_retried() {
        let mut inventory = Inventory::open_in_memory().unwrap();
        inventory
            .conn()
            .execute_batch(
                "CREATE TEMP TRIGGER reject_inode BEFORE INSERT ON paths WHEN NEW.inode = 99
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let chunk = vec![dir("a", 10, 1), dir("b", 11, 10), file("bad", 99, 11, 1)];
        let mut reconciler = Reconciler::begin(&mut inventory, ReconcileOptions::default()).unwrap();
        assert!(matches!(reconciler.apply_chunk(&chunk), Err(StoreError::Sqlite(_))));
        assert_eq!(reconciler.root(), None);

        reconciler
            .inventory
            .conn()
            .execute_batch("DROP TRIGGER reject_inode")
            .unwrap();
        reconciler.apply_chunk(&chunk).unwrap();
        let summary = reconciler.finish(&Locator::parse("/data/a").unwrap()).unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.unresolved, 0);
        assert_eq!(inventory.len(), 3);
        let bad = inventory.resolve_identity(InodeInfo::new(99, 1)).unwrap().unwrap();
        assert_eq!(inventory.full_path(bad).unwrap(), "/data/a/b/bad");
    }
}

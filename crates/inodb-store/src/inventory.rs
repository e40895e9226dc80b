//! The inventory handle: database connection plus tree index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use inodb_core::{IndexConfig, InodeInfo, PathEntry, PathId, RootPath};

use crate::error::StoreError;
use crate::schema::{
    ENTRY_COLUMNS, apply_pragmas, entry_from_row, fill_id_table, migrate, read_meta, to_sql_u64,
    write_meta,
};
use crate::tree::TreeIndex;

/// Temporary table holding the ids a query is restricted to.
pub const SCOPE_TABLE: &str = "scope";

const NAME_BATCH: usize = 500;

/// Handle to one inventory database.
///
/// Holds the single writer connection and the tree index built from it.
/// Pass it explicitly to the reconciler and query functions.
pub struct Inventory {
    pub(crate) conn: Connection,
    db_path: Option<PathBuf>,
    pub(crate) tree: TreeIndex,
    generation: u64,
}

impl Inventory {
    /// Open (or create) the inventory at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(db_path)?;
        let inventory = Self::with_connection(conn, Some(db_path.to_path_buf()))?;
        info!(path = %db_path.display(), entries = inventory.tree.len(), "Opened inventory");
        Ok(inventory)
    }

    /// Open the inventory configured in `config`.
    pub fn from_config(config: &IndexConfig) -> Result<Self, StoreError> {
        Self::open(&config.database)
    }

    /// Open a private in-memory inventory.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        apply_pragmas(&conn)?;
        migrate(&conn)?;
        let generation = read_meta(&conn, "generation")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let tree = TreeIndex::load(&conn)?;
        Ok(Self {
            conn,
            db_path,
            tree,
            generation,
        })
    }

    /// The underlying connection, for read queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Database file, or `None` for in-memory inventories.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Counter bumped after every completed scan.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) -> Result<u64, StoreError> {
        self.generation += 1;
        write_meta(&self.conn, "generation", &self.generation.to_string())?;
        Ok(self.generation)
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    /// Rebuild the tree index from the database.
    pub(crate) fn reload_tree(&mut self) -> Result<(), StoreError> {
        debug!("Reloading tree index");
        self.tree = TreeIndex::load(&self.conn)?;
        Ok(())
    }

    /// Number of stored paths.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Newest `last_seen` of any stored path.
    pub fn latest_last_seen(&self) -> Result<Option<f64>, StoreError> {
        let latest = self
            .conn
            .query_row("SELECT MAX(last_seen) FROM paths", [], |row| row.get(0))?;
        Ok(latest)
    }

    pub fn entry(&self, id: PathId) -> Result<PathEntry, StoreError> {
        self.try_entry(id)?.ok_or(StoreError::UnknownPath { id })
    }

    pub fn try_entry(&self, id: PathId) -> Result<Option<PathEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM paths p JOIN basenames b ON b.id = p.basename_id
             WHERE p.id = ?1"
        ))?;
        Ok(stmt.query_row(params![id.0], entry_from_row).optional()?)
    }

    pub fn parent_of(&self, id: PathId) -> Option<PathId> {
        self.tree.parent_of(id)
    }

    /// Direct children of `id`, sorted by name.
    pub fn children(&self, id: PathId) -> Result<Vec<PathEntry>, StoreError> {
        let mut children = self
            .tree
            .children(id)
            .map(|child| self.entry(child))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    pub fn ancestors(&self, id: PathId) -> Vec<(PathId, u32)> {
        self.tree.ancestors(id)
    }

    pub fn descendants(&self, id: PathId) -> Vec<(PathId, u32)> {
        self.tree.descendants(id)
    }

    /// Newest row with the given identity.
    pub fn resolve_identity(&self, identity: InodeInfo) -> Result<Option<PathId>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id FROM paths WHERE inode = ?1 AND device = ?2
             ORDER BY last_seen DESC, id DESC LIMIT 1",
        )?;
        let id = stmt
            .query_row(
                params![to_sql_u64(identity.inode), to_sql_u64(identity.device)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(PathId))
    }

    /// Every recorded scan root.
    pub fn root_paths(&self) -> Result<Vec<RootPath>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path_id, path FROM root_paths ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(RootPath {
                path_id: PathId(row.get(0)?),
                path: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Names of the given paths.
    pub fn names(&self, ids: &[PathId]) -> Result<HashMap<PathId, CompactString>, StoreError> {
        let mut names = HashMap::with_capacity(ids.len());
        for batch in ids.chunks(NAME_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT p.id, b.name FROM paths p JOIN basenames b ON b.id = p.basename_id
                 WHERE p.id IN ({placeholders})"
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(batch.iter().map(|id| id.0)),
                |row| Ok((PathId(row.get(0)?), CompactString::from(row.get::<_, String>(1)?))),
            )?;
            for row in rows {
                let (id, name) = row?;
                names.insert(id, name);
            }
        }
        Ok(names)
    }

    /// Full path of one entry.
    pub fn full_path(&self, id: PathId) -> Result<String, StoreError> {
        if !self.tree.contains(id) {
            return Err(StoreError::UnknownPath { id });
        }
        let mut paths = self.full_paths(&[id])?;
        Ok(paths.pop().unwrap_or_default())
    }

    /// Full paths of many entries, in input order.
    ///
    /// A path starts at the nearest ancestor that is a recorded scan root,
    /// which contributes its recorded path. Entries with no such ancestor
    /// get a partial path beginning with their topmost ancestor's name.
    pub fn full_paths(&self, ids: &[PathId]) -> Result<Vec<String>, StoreError> {
        let roots: HashMap<PathId, String> = self
            .root_paths()?
            .into_iter()
            .map(|root| (root.path_id, root.path))
            .collect();

        let mut chains = Vec::with_capacity(ids.len());
        let mut needed = Vec::new();
        for id in ids {
            let mut chain = Vec::new();
            for (ancestor, _) in self.tree.ancestors(*id) {
                chain.push(ancestor);
                if roots.contains_key(&ancestor) {
                    break;
                }
            }
            needed.extend(chain.iter().copied());
            chains.push(chain);
        }
        needed.sort_unstable();
        needed.dedup();
        let names = self.names(&needed)?;

        Ok(chains
            .into_iter()
            .map(|chain| join_chain(&chain, &roots, &names))
            .collect())
    }

    /// Write `ids` into the temporary [`SCOPE_TABLE`] for joins.
    pub fn fill_scope(&self, ids: impl IntoIterator<Item = PathId>) -> Result<(), StoreError> {
        fill_id_table(&self.conn, SCOPE_TABLE, ids)
    }
}

/// Join a nearest-first ancestor chain into a path string.
fn join_chain(
    chain: &[PathId],
    roots: &HashMap<PathId, String>,
    names: &HashMap<PathId, CompactString>,
) -> String {
    let mut out = String::new();
    for (i, id) in chain.iter().rev().enumerate() {
        if i == 0 {
            if let Some(base) = roots.get(id) {
                out.push_str(base);
                continue;
            }
        } else if !out.ends_with('/') {
            out.push('/');
        }
        if let Some(name) = names.get(id) {
            out.push_str(name);
        }
    }
    out
}

impl std::fmt::Debug for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inventory")
            .field("db_path", &self.db_path)
            .field("entries", &self.tree.len())
            .field("generation", &self.generation)
            .finish()
    }
}

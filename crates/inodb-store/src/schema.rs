//! Database schema, pragmas and small SQL helpers.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use inodb_core::PathId;

use crate::error::StoreError;

pub const SCHEMA_VERSION: &str = "1";

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS basenames (
        id   INTEGER PRIMARY KEY,
        name TEXT    NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS paths (
        id            INTEGER PRIMARY KEY,
        parent_id     INTEGER,
        basename_id   INTEGER NOT NULL REFERENCES basenames (id),
        inode         INTEGER NOT NULL,
        device        INTEGER NOT NULL,
        parent_inode  INTEGER NOT NULL,
        parent_device INTEGER NOT NULL,
        size          INTEGER,
        mtime         REAL,
        ctime         REAL,
        uid           INTEGER,
        gid           INTEGER,
        mode          INTEGER,
        links         INTEGER,
        last_seen     REAL    NOT NULL,
        UNIQUE (basename_id, inode, device, parent_inode, parent_device)
    );

    CREATE INDEX IF NOT EXISTS idx_paths_parent ON paths (parent_id);
    CREATE INDEX IF NOT EXISTS idx_paths_identity ON paths (inode, device);

    CREATE TABLE IF NOT EXISTS root_paths (
        path_id INTEGER PRIMARY KEY,
        path    TEXT    NOT NULL
    );

    CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    ) WITHOUT ROWID;
";

/// Columns of a `paths p JOIN basenames b` row, in [`entry_from_row`] order.
pub(crate) const ENTRY_COLUMNS: &str = "p.id, p.parent_id, p.basename_id, b.name, p.inode, \
     p.device, p.parent_inode, p.parent_device, p.size, p.mtime, p.ctime, p.uid, p.gid, \
     p.mode, p.links, p.last_seen";

/// Apply WAL-mode pragmas for performance.
pub(crate) fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -65536;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

/// Create tables if missing and check the stored schema version.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(CREATE_TABLES_SQL)?;

    match read_meta(conn, "schema_version")? {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(StoreError::SchemaMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found,
        }),
        None => {
            debug!(version = SCHEMA_VERSION, "Initialising new inventory");
            write_meta(conn, "schema_version", SCHEMA_VERSION)?;
            write_meta(conn, "generation", "0")?;
            Ok(())
        }
    }
}

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// Replace the contents of a temporary id table.
///
/// The table is created on first use and lives as long as the connection.
pub(crate) fn fill_id_table(
    conn: &Connection,
    table: &str,
    ids: impl IntoIterator<Item = PathId>,
) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TEMP TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY);
         DELETE FROM {table};"
    ))?;
    let mut stmt = conn.prepare_cached(&format!("INSERT OR IGNORE INTO {table} (id) VALUES (?1)"))?;
    for id in ids {
        stmt.execute(params![id.0])?;
    }
    Ok(())
}

// SQLite integers are signed; u64 fields round-trip through a bit cast.

pub(crate) fn to_sql_u64(value: u64) -> i64 {
    value as i64
}

pub(crate) fn from_sql_u64(value: i64) -> u64 {
    value as u64
}

pub(crate) fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<inodb_core::PathEntry> {
    let opt_u64 = |idx: usize| -> rusqlite::Result<Option<u64>> {
        Ok(row.get::<_, Option<i64>>(idx)?.map(from_sql_u64))
    };

    Ok(inodb_core::PathEntry {
        id: PathId(row.get(0)?),
        parent_id: row.get::<_, Option<i64>>(1)?.map(PathId),
        basename_id: inodb_core::BasenameId(row.get(2)?),
        name: row.get::<_, String>(3)?.into(),
        inode: from_sql_u64(row.get(4)?),
        device: from_sql_u64(row.get(5)?),
        parent_inode: from_sql_u64(row.get(6)?),
        parent_device: from_sql_u64(row.get(7)?),
        size: opt_u64(8)?,
        mtime: row.get(9)?,
        ctime: row.get(10)?,
        uid: row.get(11)?,
        gid: row.get(12)?,
        mode: row.get(13)?,
        links: opt_u64(14)?,
        last_seen: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_stamps_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(
            read_meta(&conn, "schema_version").unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
        // Idempotent
        migrate(&conn).unwrap();
    }

    #[test]
    fn test_migrate_rejects_other_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        write_meta(&conn, "schema_version", "0").unwrap();
        assert!(matches!(
            migrate(&conn),
            Err(StoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_u64_round_trip() {
        for value in [0, 1, i64::MAX as u64, u64::MAX] {
            assert_eq!(from_sql_u64(to_sql_u64(value)), value);
        }
    }

    #[test]
    fn test_fill_id_table_replaces() {
        let conn = Connection::open_in_memory().unwrap();
        fill_id_table(&conn, "scope", [PathId(1), PathId(2), PathId(2)]).unwrap();
        fill_id_table(&conn, "scope", [PathId(3)]).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM scope", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

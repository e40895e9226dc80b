//! `find` and `du` over the subtrees of one or more roots.

use std::collections::HashSet;
use std::time::Instant;

use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use inodb_core::{PathId, now_timestamp};
use inodb_store::{Inventory, SCOPE_TABLE};

use crate::error::QueryError;
use crate::filter::FindFilter;

/// Aggregate returned by [`du`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DuTotals {
    /// Sum of apparent sizes in bytes.
    pub size: f64,
    pub inodes: u64,
}

/// Write the query scope into the temp table and return it in tree order.
///
/// The scope is the union of the subtrees under `roots`, minus the whole
/// subtree of every in-scope entry named in `exclude`.
pub fn prepare_scope(
    inventory: &Inventory,
    roots: &[PathId],
    exclude: &[String],
) -> Result<Vec<PathId>, QueryError> {
    let tree = inventory.tree();
    if let Some(id) = roots.iter().find(|id| !tree.contains(**id)) {
        return Err(QueryError::RootNotIndexed { id: *id });
    }

    let mut scope = tree.descendants_of(roots);
    if !exclude.is_empty() {
        inventory.fill_scope(scope.iter().copied())?;
        let matched = named_in_scope(inventory, exclude)?;
        if !matched.is_empty() {
            let dropped: HashSet<PathId> = tree.descendants_of(&matched).into_iter().collect();
            scope.retain(|id| !dropped.contains(id));
        }
    }
    inventory.fill_scope(scope.iter().copied())?;
    Ok(scope)
}

fn named_in_scope(inventory: &Inventory, names: &[String]) -> Result<Vec<PathId>, QueryError> {
    let placeholders = vec!["?"; names.len()].join(", ");
    let sql = format!(
        "SELECT p.id FROM paths p
         JOIN {SCOPE_TABLE} s ON s.id = p.id
         JOIN basenames b ON b.id = p.basename_id
         WHERE b.name IN ({placeholders})"
    );
    let mut stmt = inventory.conn().prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(names), |row| Ok(PathId(row.get(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Ids under `roots` matching `filter`, in tree order.
pub fn find_ids(
    inventory: &Inventory,
    roots: &[PathId],
    filter: &FindFilter,
) -> Result<Vec<PathId>, QueryError> {
    let scope = prepare_scope(inventory, roots, &filter.exclude)?;
    let (clause, params) = filter.where_clause(now_timestamp());
    let sql = format!(
        "SELECT p.id FROM paths p JOIN {SCOPE_TABLE} s ON s.id = p.id WHERE {clause}"
    );
    let mut stmt = inventory.conn().prepare(&sql)?;
    let matched = stmt
        .query_map(params_from_iter(params), |row| Ok(PathId(row.get(0)?)))?
        .collect::<Result<HashSet<_>, _>>()?;

    Ok(scope.into_iter().filter(|id| matched.contains(id)).collect())
}

/// Full paths of the entries under `roots` matching `filter`.
pub fn find(
    inventory: &Inventory,
    roots: &[PathId],
    filter: &FindFilter,
) -> Result<Vec<String>, QueryError> {
    let start = Instant::now();
    let ids = find_ids(inventory, roots, filter)?;
    let paths = inventory.full_paths(&ids)?;
    debug!(roots = roots.len(), matches = paths.len(), elapsed = ?start.elapsed(), "find");
    Ok(paths)
}

/// Total size and entry count under `roots` matching `filter`.
///
/// Uncached; see [`crate::DuCache`].
pub fn du(inventory: &Inventory, roots: &[PathId], filter: &FindFilter) -> Result<DuTotals, QueryError> {
    let start = Instant::now();
    prepare_scope(inventory, roots, &filter.exclude)?;
    let (clause, params) = filter.where_clause(now_timestamp());
    let sql = format!(
        "SELECT TOTAL(p.size), COUNT(*) FROM paths p
         JOIN {SCOPE_TABLE} s ON s.id = p.id WHERE {clause}"
    );
    let totals = inventory
        .conn()
        .query_row(&sql, params_from_iter(params), |row| {
            Ok(DuTotals {
                size: row.get(0)?,
                inodes: row.get::<_, i64>(1)? as u64,
            })
        })?;
    debug!(roots = roots.len(), inodes = totals.inodes, elapsed = ?start.elapsed(), "du");
    Ok(totals)
}

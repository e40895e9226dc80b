//! Per-owner usage reports and tag summaries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use inodb_core::{Locator, OwnerKind, PathId, TagConfig};
use inodb_store::{Inventory, Pipeline, SCOPE_TABLE};

use crate::error::QueryError;
use crate::find::prepare_scope;

/// Usage of one (uid, gid) pair under a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Resolved through the system user database when known.
    pub user: Option<String>,
    pub group: Option<String>,
    pub inodes: u64,
    pub size: f64,
    /// Oldest `last_seen` in the group.
    pub last_seen: Option<f64>,
}

/// Usage under one root, largest owners first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootReport {
    pub root: PathId,
    pub path: String,
    pub rows: Vec<UsageRow>,
}

impl RootReport {
    pub fn total_size(&self) -> f64 {
        self.rows.iter().map(|row| row.size).sum()
    }

    pub fn total_inodes(&self) -> u64 {
        self.rows.iter().map(|row| row.inodes).sum()
    }
}

/// Totals for a named group of roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSummary {
    pub tag: String,
    pub description: Option<String>,
    pub inodes: u64,
    pub size: f64,
    pub last_seen: Option<f64>,
}

/// One report per root, in the given order.
pub fn report(inventory: &Inventory, roots: &[PathId]) -> Result<Vec<RootReport>, QueryError> {
    let paths = inventory.full_paths(roots)?;
    roots
        .iter()
        .zip(paths)
        .map(|(root, path)| {
            Ok(RootReport {
                root: *root,
                path,
                rows: usage_rows(inventory, *root)?,
            })
        })
        .collect()
}

/// Reports for every recorded scan root.
pub fn report_all(inventory: &Inventory) -> Result<Vec<RootReport>, QueryError> {
    let roots: Vec<PathId> = inventory
        .root_paths()?
        .into_iter()
        .map(|root| root.path_id)
        .collect();
    report(inventory, &roots)
}

fn usage_rows(inventory: &Inventory, root: PathId) -> Result<Vec<UsageRow>, QueryError> {
    prepare_scope(inventory, &[root], &[])?;
    let sql = format!(
        "SELECT p.uid, p.gid, COUNT(*), TOTAL(p.size) AS total, MIN(p.last_seen)
         FROM paths p JOIN {SCOPE_TABLE} s ON s.id = p.id
         GROUP BY p.uid, p.gid
         ORDER BY total DESC, p.uid, p.gid"
    );
    let mut stmt = inventory.conn().prepare_cached(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let uid: Option<u32> = row.get(0)?;
            let gid: Option<u32> = row.get(1)?;
            Ok(UsageRow {
                uid,
                gid,
                user: uid.and_then(|id| OwnerKind::User.name_of(id)),
                group: gid.and_then(|id| OwnerKind::Group.name_of(id)),
                inodes: row.get::<_, i64>(2)? as u64,
                size: row.get(3)?,
                last_seen: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    debug!(root = %root, owners = rows.len(), "Usage report");
    Ok(rows)
}

/// Totals over the union of the subtrees under `roots`.
pub fn summarise_tag(
    inventory: &Inventory,
    tag: &str,
    config: &TagConfig,
    roots: &[PathId],
) -> Result<TagSummary, QueryError> {
    prepare_scope(inventory, roots, &[])?;
    let sql = format!(
        "SELECT COUNT(*), TOTAL(p.size), MIN(p.last_seen)
         FROM paths p JOIN {SCOPE_TABLE} s ON s.id = p.id"
    );
    let summary = inventory.conn().query_row(&sql, [], |row| {
        Ok(TagSummary {
            tag: tag.to_string(),
            description: config.description.clone(),
            inodes: row.get::<_, i64>(0)? as u64,
            size: row.get(1)?,
            last_seen: row.get(2)?,
        })
    })?;
    Ok(summary)
}

/// Summaries of every configured tag.
///
/// Tag paths are resolved against roots already in the inventory; paths
/// that were never scanned, or fail to parse, are skipped with a warning.
pub fn summarise_tags(
    inventory: &Inventory,
    pipeline: &Pipeline,
    tags: &IndexMap<String, TagConfig>,
) -> Result<Vec<TagSummary>, QueryError> {
    let mut summaries = Vec::with_capacity(tags.len());
    for (tag, config) in tags {
        let mut roots = Vec::new();
        for path in &config.paths {
            let resolved = Locator::parse(path)
                .map_err(inodb_store::StoreError::from)
                .and_then(|locator| pipeline.resolve(inventory, &locator));
            match resolved {
                Ok(Some(id)) => roots.push(id),
                Ok(None) => warn!(tag = %tag, path = %path, "Tag path is not indexed"),
                Err(e) => warn!(tag = %tag, path = %path, error = %e, "Cannot resolve tag path"),
            }
        }
        summaries.push(summarise_tag(inventory, tag, config, &roots)?);
    }
    Ok(summaries)
}

//! Compliance checks over indexed subtrees.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use inodb_core::{FileMode, PathId};
use inodb_store::{Inventory, SCOPE_TABLE};

use crate::error::QueryError;
use crate::find::prepare_scope;

/// A rule that every entry under a root should satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Check {
    /// Entries must belong to this group.
    GroupOwnership { gid: u32 },
    /// Directories must grant the group read or execute.
    DirectoryGroupReadable,
}

impl Check {
    fn condition(&self) -> (String, Vec<Value>) {
        match self {
            Self::GroupOwnership { gid } => {
                ("p.gid != ?".to_string(), vec![Value::Integer(i64::from(*gid))])
            }
            Self::DirectoryGroupReadable => (
                "p.mode & ? = ? AND p.mode & ? = 0".to_string(),
                vec![
                    Value::Integer(i64::from(FileMode::TYPE_MASK)),
                    Value::Integer(i64::from(FileMode::DIRECTORY)),
                    Value::Integer(i64::from(FileMode::GROUP_READ | FileMode::GROUP_EXEC)),
                ],
            ),
        }
    }

    /// Ids of the entries under `roots` that fail this check, in tree order.
    pub fn offending_ids(&self, inventory: &Inventory, roots: &[PathId]) -> Result<Vec<PathId>, QueryError> {
        let scope = prepare_scope(inventory, roots, &[])?;
        let (clause, params) = self.condition();
        let sql = format!(
            "SELECT p.id FROM paths p JOIN {SCOPE_TABLE} s ON s.id = p.id WHERE {clause}"
        );
        let mut stmt = inventory.conn().prepare(&sql)?;
        let failed = stmt
            .query_map(params_from_iter(params), |row| Ok(PathId(row.get(0)?)))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(scope.into_iter().filter(|id| failed.contains(id)).collect())
    }

    /// Full paths of the entries under `roots` that fail this check.
    pub fn run(&self, inventory: &Inventory, roots: &[PathId]) -> Result<Vec<String>, QueryError> {
        let ids = self.offending_ids(inventory, roots)?;
        info!(check = %self, failures = ids.len(), "Check complete");
        Ok(inventory.full_paths(&ids)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names() {
        assert_eq!(Check::GroupOwnership { gid: 1 }.to_string(), "group-ownership");
        assert_eq!(Check::DirectoryGroupReadable.to_string(), "directory-group-readable");
    }

    #[test]
    fn test_group_readable_condition_bits() {
        let (_, params) = Check::DirectoryGroupReadable.condition();
        assert_eq!(params[2], Value::Integer(0o050));
    }
}

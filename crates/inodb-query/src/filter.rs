//! Filters for `find` and `du`.

use std::time::Duration;

use derive_builder::Builder;
use itertools::Itertools;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use inodb_core::OwnerKind;

use crate::error::QueryError;

/// Predicates ANDed together by `find` and `du`.
///
/// Every field is optional; the default filter matches everything in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Builder, Serialize, Deserialize)]
#[builder(default)]
pub struct FindFilter {
    /// Only entries modified longer ago than this.
    #[builder(setter(strip_option))]
    pub older_than: Option<Duration>,

    #[builder(setter(strip_option))]
    pub users: Option<OwnerFilter>,

    #[builder(setter(strip_option))]
    pub groups: Option<OwnerFilter>,

    /// Basenames whose whole subtree is dropped from the scope.
    #[builder(setter(into))]
    pub exclude: Vec<String>,

    /// `n >= 0` keeps sizes of at least `n`; `n < 0` keeps sizes below `|n|`.
    #[builder(setter(strip_option))]
    pub size: Option<i64>,
}

impl FindFilter {
    /// Create a new filter builder.
    pub fn builder() -> FindFilterBuilder {
        FindFilterBuilder::default()
    }

    /// Same filter with order-insensitive parts sorted, for use as a cache key.
    pub fn normalized(&self) -> Self {
        let mut filter = self.clone();
        filter.exclude.sort();
        filter.exclude.dedup();
        filter
    }

    /// SQL condition over `paths p` and its positional parameters.
    ///
    /// `now` anchors `older_than`.
    pub fn where_clause(&self, now: f64) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(age) = self.older_than {
            conditions.push("p.mtime < ?".to_string());
            params.push(Value::Real(now - age.as_secs_f64()));
        }
        for owner in [&self.users, &self.groups].into_iter().flatten() {
            owner.push_conditions(&mut conditions, &mut params);
        }
        if let Some(size) = self.size {
            if size >= 0 {
                conditions.push("p.size >= ?".to_string());
                params.push(Value::Integer(size));
            } else {
                conditions.push("p.size < ?".to_string());
                params.push(Value::Integer(size.checked_neg().unwrap_or(i64::MAX)));
            }
        }

        if conditions.is_empty() {
            ("1".to_string(), params)
        } else {
            (conditions.join(" AND "), params)
        }
    }
}

/// Owner or group match: in any of `include` and in none of `exclude`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerFilter {
    pub kind: OwnerKind,
    pub include: Vec<u32>,
    pub exclude: Vec<u32>,
}

impl OwnerFilter {
    /// Parse names or numeric ids. A leading `!` or `-` negates a value.
    pub fn parse<I, S>(kind: OwnerKind, values: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for value in values {
            let value = value.as_ref().trim();
            let (negated, name) = match value.strip_prefix(['!', '-']) {
                Some(rest) => (true, rest),
                None => (false, value),
            };
            let id = kind.resolve(name).ok_or_else(|| QueryError::UnknownOwner {
                kind,
                name: name.to_string(),
            })?;
            if negated {
                exclude.push(id);
            } else {
                include.push(id);
            }
        }
        Ok(Self {
            kind,
            include: include.into_iter().sorted().dedup().collect(),
            exclude: exclude.into_iter().sorted().dedup().collect(),
        })
    }

    fn column(&self) -> &'static str {
        match self.kind {
            OwnerKind::User => "p.uid",
            OwnerKind::Group => "p.gid",
        }
    }

    fn push_conditions(&self, conditions: &mut Vec<String>, params: &mut Vec<Value>) {
        let column = self.column();
        for (ids, op) in [(&self.include, "IN"), (&self.exclude, "NOT IN")] {
            if ids.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            conditions.push(format!("{column} {op} ({placeholders})"));
            params.extend(ids.iter().map(|id| Value::Integer(i64::from(*id))));
        }
    }
}

//! Queries over an inodb inventory.
//!
//! Every query is scoped to the subtrees under a set of root ids, taken from
//! the inventory's tree index and written to a temporary table that the SQL
//! joins against:
//!
//! - **find** - full paths matching a [`FindFilter`]
//! - **du** - total size and entry count, memoized by [`DuCache`]
//! - **report** - usage per (uid, gid), largest first, plus tag summaries
//! - **checks** - group ownership and directory permission rules
//! - **export** - a nested tree for external browsers
//!
//! ```rust,no_run
//! use inodb_core::{IndexConfig, Locator};
//! use inodb_query::{DuCache, FindFilter, find};
//! use inodb_store::{Inventory, Pipeline};
//!
//! let config = IndexConfig::default();
//! let mut inventory = Inventory::from_config(&config).unwrap();
//! let pipeline = Pipeline::from_config(&config);
//! let root = pipeline
//!     .autoscan(&mut inventory, &Locator::parse("/scratch/w35").unwrap())
//!     .unwrap();
//!
//! let filter = FindFilter::builder().size(1 << 30).build().unwrap();
//! for path in find(&inventory, &[root], &filter).unwrap() {
//!     println!("{path}");
//! }
//!
//! let cache = DuCache::from_config(&config);
//! let totals = cache.du(&inventory, &[root], &FindFilter::default()).unwrap();
//! println!("{} bytes in {} inodes", totals.size, totals.inodes);
//! ```

mod cache;
mod check;
mod error;
mod export;
mod filter;
mod find;
mod report;

pub use cache::DuCache;
pub use check::Check;
pub use error::QueryError;
pub use export::{EXPORT_ROOT, ExportNode, export_json, export_tree};
pub use filter::{FindFilter, FindFilterBuilder, OwnerFilter};
pub use find::{DuTotals, du, find, find_ids, prepare_scope};
pub use report::{
    RootReport, TagSummary, UsageRow, report, report_all, summarise_tag, summarise_tags,
};

// Re-export core types for convenience
pub use inodb_core::{OwnerKind, PathId};

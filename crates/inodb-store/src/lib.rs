//! SQLite-backed filesystem inventory for inodb.
//!
//! The [`Inventory`] owns the database connection and an in-memory
//! [`TreeIndex`] of parent links. Scans flow from a producer through the
//! [`Pipeline`] into a [`Reconciler`], which upserts records in chunked
//! transactions, resolves parent links, and finally sweeps entries under the
//! scan root that were not seen again.
//!
//! # Example
//!
//! ```rust,no_run
//! use inodb_core::{IndexConfig, Locator};
//! use inodb_store::{Inventory, Pipeline};
//!
//! let config = IndexConfig::default();
//! let mut inventory = Inventory::open(&config.database).unwrap();
//! let pipeline = Pipeline::from_config(&config);
//!
//! let locator = Locator::parse("/path/to/scan").unwrap();
//! let summary = pipeline.scan(&mut inventory, &locator).unwrap();
//! println!("{} records, {} removed", summary.records, summary.swept);
//! ```

mod error;
mod inventory;
mod pipeline;
mod reconcile;
mod schema;
mod tree;

pub use error::StoreError;
pub use inventory::{Inventory, SCOPE_TABLE};
pub use pipeline::Pipeline;
pub use reconcile::{ReconcileOptions, Reconciler, ScanSummary};
pub use schema::SCHEMA_VERSION;
pub use tree::TreeIndex;

// Re-export core types for convenience
pub use inodb_core::{PathEntry, PathId, RootPath};

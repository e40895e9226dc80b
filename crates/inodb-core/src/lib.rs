//! Core types and traits for inodb.
//!
//! This crate provides the data structures shared by the inodb crates:
//! scan records, stored inventory rows, scan-root locators, configuration
//! and error types.

mod config;
mod error;
mod locator;
mod owner;
mod record;

pub use config::{CONFIG_FILE, IndexConfig, IndexConfigBuilder, TagConfig, TapeConfig};
pub use error::{ConfigError, ScanError};
pub use locator::{Locator, Scheme};
pub use owner::OwnerKind;
pub use record::{
    BasenameId, FileMode, InodeInfo, PathEntry, PathId, Record, RootPath, UNKNOWN_INODE,
};

/// Current time as fractional seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

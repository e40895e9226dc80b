//! Record producers for inodb.
//!
//! A producer turns a scan-root [`Locator`] into a stream of [`Record`]s,
//! one per entry beneath the root, with the root itself first. Two producers
//! ship with the crate:
//!
//! - [`LocalProducer`] walks a local filesystem in parallel via jwalk/rayon
//! - [`TapeProducer`] parses the recursive listing of a tape archive
//!
//! Producers are looked up by the locator's scheme through a
//! [`ProducerRegistry`].
//!
//! # Example
//!
//! ```rust,no_run
//! use inodb_scan::{Locator, ProducerRegistry};
//!
//! let registry = ProducerRegistry::with_defaults(&Default::default());
//! let locator = Locator::parse("/path/to/scan").unwrap();
//! let producer = registry.for_locator(&locator).unwrap();
//!
//! for record in producer.produce(&locator, inodb_core::now_timestamp()).unwrap() {
//!     let record = record.unwrap();
//!     println!("{} ({:?} bytes)", record.basename, record.size);
//! }
//! ```

mod local;
mod mode;
mod producer;
mod progress;
mod tape;

pub use local::LocalProducer;
pub use mode::{format_mode, parse_mode};
pub use producer::{Producer, ProducerRegistry, RecordStream};
pub use progress::{ProgressTracker, ScanProgress};
pub use tape::{ListingParser, TapeProducer, namespace_device};

// Re-export core types for convenience
pub use inodb_core::{IndexConfig, InodeInfo, Locator, Record, ScanError, Scheme};

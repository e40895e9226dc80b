//! Scan progress reporting.

use std::time::{Duration, Instant};

use compact_str::CompactString;
use inodb_core::Record;

/// Snapshot of a running scan, broadcast by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    pub records: u64,
    pub directories: u64,
    /// Sum of the sizes of the records seen so far.
    pub bytes: u64,
    /// Records that arrived without metadata.
    pub unreadable: u64,
    /// Basename of the latest record.
    pub last_name: CompactString,
    pub elapsed: Duration,
}

impl ScanProgress {
    pub fn records_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.records as f64 / secs } else { 0.0 }
    }
}

/// Counts records as they pass from producer to reconciler.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    current: ScanProgress,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: ScanProgress::default(),
        }
    }

    pub fn record(&mut self, record: &Record) {
        let current = &mut self.current;
        current.records += 1;
        current.bytes += record.size.unwrap_or(0);
        current.directories += u64::from(record.is_dir());
        current.unreadable += u64::from(!record.has_metadata());
        current.last_name.clone_from(&record.basename);
    }

    pub fn records(&self) -> u64 {
        self.current.records
    }

    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            elapsed: self.started.elapsed(),
            ..self.current.clone()
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

//! Error types for scanning and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while producing scan records.
///
/// Per-entry problems (`PermissionDenied`, `NotFound`) are normally recovered
/// inside a producer; everything else aborts the scan it occurred in.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A listing line did not match the grammar expected in the parser state.
    #[error("Unexpected listing line {line_no} while {state}: {line:?}")]
    Parse {
        line_no: usize,
        state: &'static str,
        line: String,
    },

    /// An external listing command failed.
    #[error("Command `{program}` failed: {status}")]
    Command { program: String, status: String },

    /// No producer is registered for the locator's scheme.
    #[error("Unsupported locator scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    /// Locator could not be parsed.
    #[error("Invalid locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// Other error.
    #[error("{message}")]
    Other { message: String },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Whether this error only affects a single entry of a walk.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. } | Self::NotFound { .. })
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

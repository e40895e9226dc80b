//! Scheme-qualified addresses of scan roots.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ScanError;

/// Producer family a locator is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Scheme {
    /// Local filesystem (`file://` or a bare path).
    File,
    /// Tape archive listing (`tape://<namespace>/<path>`).
    Tape,
}

/// Address of a scan root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    scheme: Scheme,
    namespace: Option<String>,
    path: String,
}

impl Locator {
    /// Parse and normalize a locator string.
    ///
    /// Local paths become absolute and lexically clean; tape paths become
    /// relative to the namespace root.
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let Some((scheme, rest)) = input.split_once("://") else {
            return Self::local(input);
        };

        let scheme: Scheme = scheme
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| ScanError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })?;

        match scheme {
            Scheme::File => Self::local(rest),
            Scheme::Tape => {
                let (namespace, path) = rest.split_once('/').unwrap_or((rest, ""));
                if namespace.is_empty() {
                    return Err(ScanError::InvalidLocator {
                        locator: input.to_string(),
                        reason: "missing tape namespace".to_string(),
                    });
                }
                let path = normalize(Path::new(path.trim_start_matches('/')));
                let path = if path.as_os_str().is_empty() {
                    ".".to_string()
                } else {
                    path.to_string_lossy().into_owned()
                };
                Ok(Self {
                    scheme,
                    namespace: Some(namespace.to_string()),
                    path,
                })
            }
        }
    }

    /// Locator for a local filesystem path.
    pub fn local(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ScanError::InvalidLocator {
                locator: String::new(),
                reason: "empty path".to_string(),
            });
        }
        let absolute = std::path::absolute(path).map_err(|e| ScanError::io(path, e))?;
        Ok(Self {
            scheme: Scheme::File,
            namespace: None,
            path: normalize(&absolute).to_string_lossy().into_owned(),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Tape namespace (project), if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Path within the producer's namespace.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path as a local filesystem path.
    pub fn fs_path(&self) -> &Path {
        Path::new(&self.path)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.scheme, &self.namespace) {
            (Scheme::File, _) => f.write_str(&self.path),
            (scheme, Some(ns)) if self.path == "." => write!(f, "{scheme}://{ns}"),
            (scheme, Some(ns)) => write!(f, "{scheme}://{ns}/{}", self.path),
            (scheme, None) => write!(f, "{scheme}://{}", self.path),
        }
    }
}

impl std::str::FromStr for Locator {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Lexically remove `.` and resolve `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_path_is_local() {
        let loc = Locator::parse("/data/project/../scratch/./x").unwrap();
        assert_eq!(loc.scheme(), Scheme::File);
        assert_eq!(loc.path(), "/data/scratch/x");
        assert_eq!(loc.to_string(), "/data/scratch/x");
    }

    #[test]
    fn test_file_scheme() {
        let loc = Locator::parse("file:///srv/data/").unwrap();
        assert_eq!(loc.scheme(), Scheme::File);
        assert_eq!(loc.path(), "/srv/data");
    }

    #[test]
    fn test_relative_path_made_absolute() {
        let loc = Locator::parse("some/dir").unwrap();
        assert!(loc.fs_path().is_absolute());
        assert!(loc.path().ends_with("some/dir"));
    }

    #[test]
    fn test_tape_locator() {
        let loc = Locator::parse("tape://w35/saw562/runs").unwrap();
        assert_eq!(loc.scheme(), Scheme::Tape);
        assert_eq!(loc.namespace(), Some("w35"));
        assert_eq!(loc.path(), "saw562/runs");
        assert_eq!(loc.to_string(), "tape://w35/saw562/runs");

        let top = Locator::parse("tape://w35").unwrap();
        assert_eq!(top.path(), ".");
        assert_eq!(top.to_string(), "tape://w35");
    }

    #[test]
    fn test_invalid_locators() {
        assert!(matches!(
            Locator::parse("s3://bucket/key"),
            Err(ScanError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            Locator::parse("tape:///path"),
            Err(ScanError::InvalidLocator { .. })
        ));
        assert!(Locator::parse("").is_err());
    }
}

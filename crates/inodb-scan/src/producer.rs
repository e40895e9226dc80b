//! The producer capability and the scheme registry.

use std::collections::HashMap;
use std::sync::Arc;

use inodb_core::{IndexConfig, InodeInfo, Locator, Record, ScanError, Scheme};

use crate::local::LocalProducer;
use crate::tape::TapeProducer;

/// Lazily produced records of one scan.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record, ScanError>> + Send>;

/// A source of scan records for one locator scheme.
///
/// Implementations must yield the scan root as the first record of every
/// stream. An `Err` item is fatal for the scan: consumers stop reading and
/// discard the pass.
pub trait Producer: Send + Sync {
    /// Scheme this producer handles.
    fn scheme(&self) -> Scheme;

    /// Identity of the entry the locator points at, or `None` if it does
    /// not exist.
    fn root_identity(&self, locator: &Locator) -> Result<Option<InodeInfo>, ScanError>;

    /// Start producing records for everything beneath `locator`.
    ///
    /// Every record is stamped with `scan_time` as its `last_seen`.
    fn produce(&self, locator: &Locator, scan_time: f64) -> Result<RecordStream, ScanError>;
}

/// Maps locator schemes to producers.
#[derive(Clone, Default)]
pub struct ProducerRegistry {
    producers: HashMap<Scheme, Arc<dyn Producer>>,
}

impl ProducerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the local walker and the tape listing producer.
    pub fn with_defaults(config: &IndexConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalProducer::new(config.threads)));
        registry.register(Arc::new(TapeProducer::new(config.tape.program.clone())));
        registry
    }

    /// Register a producer, replacing any previous one for its scheme.
    pub fn register(&mut self, producer: Arc<dyn Producer>) -> Option<Arc<dyn Producer>> {
        self.producers.insert(producer.scheme(), producer)
    }

    /// Producer for a scheme.
    pub fn get(&self, scheme: Scheme) -> Result<Arc<dyn Producer>, ScanError> {
        self.producers
            .get(&scheme)
            .cloned()
            .ok_or_else(|| ScanError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })
    }

    /// Producer responsible for a locator.
    pub fn for_locator(&self, locator: &Locator) -> Result<Arc<dyn Producer>, ScanError> {
        self.get(locator.scheme())
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("schemes", &self.producers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_dispatch() {
        let registry = ProducerRegistry::with_defaults(&IndexConfig::default());

        let local = Locator::parse("/tmp").unwrap();
        assert_eq!(registry.for_locator(&local).unwrap().scheme(), Scheme::File);

        let tape = Locator::parse("tape://w35/saw562").unwrap();
        assert_eq!(registry.for_locator(&tape).unwrap().scheme(), Scheme::Tape);
    }

    #[test]
    fn test_missing_scheme() {
        let registry = ProducerRegistry::new();
        let err = registry.get(Scheme::Tape).err().unwrap();
        assert!(matches!(err, ScanError::UnsupportedScheme { ref scheme } if scheme == "tape"));
    }
}

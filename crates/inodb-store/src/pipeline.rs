//! Scan pipeline: producer thread, bounded channel, reconciler.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use inodb_core::{IndexConfig, Locator, PathId, Record, ScanError};
use inodb_scan::{Producer, ProducerRegistry, ProgressTracker, ScanProgress};

use crate::error::StoreError;
use crate::inventory::Inventory;
use crate::reconcile::{ReconcileOptions, Reconciler, ScanSummary};

/// Records between progress broadcasts.
const PROGRESS_INTERVAL: u64 = 1000;

type Chunk = Result<Vec<Record>, ScanError>;

/// Drives scans from locators into an inventory.
pub struct Pipeline {
    registry: ProducerRegistry,
    batch_size: usize,
    channel_capacity: usize,
    progress_tx: broadcast::Sender<ScanProgress>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(registry: ProducerRegistry, config: &IndexConfig) -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self {
            registry,
            batch_size: config.batch_size.max(1),
            channel_capacity: config.channel_capacity.max(1),
            progress_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Pipeline with the default producers.
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(ProducerRegistry::with_defaults(config), config)
    }

    pub fn registry(&self) -> &ProducerRegistry {
        &self.registry
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Token that cancels scans run by this pipeline.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scan `locator` into `inventory`.
    ///
    /// The producer runs on its own thread and hands chunks to the
    /// reconciler through a bounded channel. Cancellation or a producer
    /// failure leaves committed chunks in place but skips the sweep.
    pub fn scan(&self, inventory: &mut Inventory, locator: &Locator) -> Result<ScanSummary, StoreError> {
        let producer = self.registry.for_locator(locator)?;
        let cancel = self.cancel.child_token();
        let mut reconciler = Reconciler::begin(
            inventory,
            ReconcileOptions {
                batch_size: self.batch_size,
                cancel: cancel.clone(),
            },
        )?;
        let scan_time = reconciler.scan_time();
        info!(locator = %locator, "Starting scan");

        let (tx, mut rx) = mpsc::channel::<Chunk>(self.channel_capacity);
        let batch_size = self.batch_size;
        let progress_tx = self.progress_tx.clone();

        let completed = std::thread::scope(|s| -> Result<bool, StoreError> {
            let handle = s.spawn(|| produce_chunks(producer, locator, scan_time, batch_size, tx, cancel));

            let mut tracker = ProgressTracker::new();
            let chunks = std::iter::from_fn(move || rx.blocking_recv()).inspect(|chunk| {
                let Ok(records) = chunk else { return };
                for record in records {
                    tracker.record(record);
                    if tracker.records() % PROGRESS_INTERVAL == 0 {
                        let progress = tracker.snapshot();
                        debug!(
                            records = progress.records,
                            per_second = progress.records_per_second() as u64,
                            "Scan progress"
                        );
                        let _ = progress_tx.send(progress);
                    }
                }
            });
            let consumed = reconciler.consume(chunks);

            let completed = handle.join().map_err(|_| ScanError::Other {
                message: "producer thread panicked".to_string(),
            })?;
            consumed?;
            Ok(completed)
        })?;

        if !completed {
            return Err(StoreError::Cancelled);
        }
        reconciler.finish(locator)
    }

    /// Row of an already indexed root, if any.
    pub fn resolve(&self, inventory: &Inventory, locator: &Locator) -> Result<Option<PathId>, StoreError> {
        let producer = self.registry.for_locator(locator)?;
        match producer.root_identity(locator)? {
            Some(identity) => inventory.resolve_identity(identity),
            None => Ok(None),
        }
    }

    /// Resolve `locator`, scanning it first if it has never been indexed.
    pub fn autoscan(&self, inventory: &mut Inventory, locator: &Locator) -> Result<PathId, StoreError> {
        if let Some(id) = self.resolve(inventory, locator)? {
            debug!(locator = %locator, id = %id, "Root already indexed");
            return Ok(id);
        }
        Ok(self.scan(inventory, locator)?.root)
    }
}

/// Run a producer to completion, sending chunks of records.
///
/// Returns `true` if the stream was fully sent, `false` if it stopped early
/// because of cancellation or a dropped receiver.
fn produce_chunks(
    producer: Arc<dyn Producer>,
    locator: &Locator,
    scan_time: f64,
    batch_size: usize,
    tx: mpsc::Sender<Chunk>,
    cancel: CancellationToken,
) -> bool {
    let stream = match producer.produce(locator, scan_time) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return true;
        }
    };

    let mut chunk = Vec::with_capacity(batch_size);
    for item in stream {
        if cancel.is_cancelled() {
            debug!(locator = %locator, "Producer cancelled");
            return false;
        }
        match item {
            Ok(record) => {
                chunk.push(record);
                if chunk.len() >= batch_size {
                    let full = std::mem::replace(&mut chunk, Vec::with_capacity(batch_size));
                    if tx.blocking_send(Ok(full)).is_err() {
                        return false;
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return true;
            }
        }
    }

    chunk.is_empty() || tx.blocking_send(Ok(chunk)).is_ok()
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("batch_size", &self.batch_size)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

//! The single-writer ingest worker.
//!
//! One worker task per open indexer multiplexes five event sources:
//!
//! ```text
//! inserts ─┐
//! deletes ─┤
//! flush   ─┼──► select! ──► batch ──► active shard ──► rotation check
//! idle    ─┤
//! close   ─┘
//! ```
//!
//! The worker is the only owner of the pending batch and the only path
//! that commits to the active shard, so batch state needs no locking.
//! Polling is biased towards the data channels: queued inserts and
//! deletes always drain before a shutdown is observed, which makes
//! closing the indexer double as a flush barrier.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use uuid::Uuid;

use kiroku_core::{IndexConfig, Metrics};

use crate::batch::Batch;
use crate::codec::Codec;
use crate::shard::{rotate_if_needed, Shard};

/// Pending entries that force a flush regardless of timers.
const MAX_BATCH_SIZE: usize = 5000;

/// A quiet period this long flushes whatever accumulated.
const IDLE_FLUSH_INTERVAL: Duration = Duration::from_secs(3);

pub(crate) struct IngestWorker {
    pub config: IndexConfig,
    pub codec: Arc<RwLock<Arc<dyn Codec>>>,
    pub shards: Arc<RwLock<Vec<Shard>>>,
    pub metrics: Metrics,
    pub inserts: mpsc::Receiver<Value>,
    pub deletes: mpsc::Receiver<String>,
    pub force_flush: mpsc::Receiver<()>,
    pub shutdown: watch::Receiver<bool>,
    pub batch: Option<Batch>,
}

impl IngestWorker {
    pub async fn run(mut self) {
        let mut inserts_open = true;
        let mut deletes_open = true;

        loop {
            tokio::select! {
                biased;
                payload = self.inserts.recv(), if inserts_open => match payload {
                    Some(payload) => self.handle_insert(payload),
                    None => inserts_open = false,
                },
                id = self.deletes.recv(), if deletes_open => match id {
                    Some(id) => self.handle_delete(id),
                    None => deletes_open = false,
                },
                _ = self.shutdown.changed() => {
                    self.stop();
                    return;
                }
                Some(()) = self.force_flush.recv() => self.flush(),
                _ = tokio::time::sleep(IDLE_FLUSH_INTERVAL) => self.flush(),
            }

            if !inserts_open && !deletes_open {
                self.stop();
                return;
            }
        }
    }

    /// Final flush, then release every shard handle.
    fn stop(&mut self) {
        self.flush();
        self.shards.write().clear();
        info!("ingest worker stopped");
    }

    fn handle_insert(&mut self, payload: Value) {
        let codec = self.codec.read().clone();
        let doc = match codec.marshal(&payload) {
            Ok(doc) => doc,
            Err(e) => {
                debug!(error = %e, "dropping payload the codec refused");
                self.metrics.record_codec_error();
                return;
            }
        };
        let id = codec
            .doc_id(&payload)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let batch = self.batch.get_or_insert_with(Batch::new);
        batch.upsert(id, doc);
        if batch.len() > MAX_BATCH_SIZE {
            self.flush();
        }
    }

    fn handle_delete(&mut self, id: String) {
        let batch = self.batch.get_or_insert_with(Batch::new);
        batch.delete(id);
        if batch.len() > MAX_BATCH_SIZE {
            self.flush();
        }
    }

    /// Commit the pending batch to the active shard, then check whether
    /// the shard grew past the rotation threshold. A failed commit loses
    /// that batch only; the worker keeps running.
    fn flush(&mut self) {
        let Some(batch) = self.batch.take() else { return };

        let (writer, schema) = {
            let shards = self.shards.read();
            let Some(active) = shards.last() else { return };
            (active.writer.clone(), active.index.schema())
        };
        let Some(writer) = writer else {
            error!("active shard has no writer, discarding batch");
            return;
        };

        match batch.apply(&writer, &schema) {
            Ok(applied) => {
                debug!(applied, "flushed batch to active shard");
                self.metrics.record_flush();
            }
            Err(e) => error!(error = %e, "cannot flush batch to active shard"),
        }

        let codec = self.codec.read().clone();
        rotate_if_needed(&self.config, &self.shards, &codec.schema(), &self.metrics);
    }
}

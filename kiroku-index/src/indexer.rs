//! The public indexer surface.
//!
//! An [`Indexer`] owns a set of rotating shards, a single background
//! ingest worker, and the submission channels feeding it. Producers never
//! block in buffered mode: when the channel is full the event is dropped
//! and counted. Callers that need deterministic handoff (tests, resync)
//! open the indexer with `sync_submit` and every submission awaits the
//! worker instead.
//!
//! Inserted documents become visible to searches at flush time: after the
//! pending batch exceeds its size threshold, after the idle interval, or
//! after an explicit [`Indexer::flush`].

use std::fs;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tantivy::collector::{Count, TopDocs};
use tantivy::schema::{Document as _, Value as _};
use tantivy::{TantivyDocument, Term};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiroku_core::{Error, IndexConfig, Metrics, MetricsSnapshot, Result};

use crate::alias::search_shards;
use crate::codec::{Codec, SearchItem, ID_FIELD};
use crate::ingest::IngestWorker;
use crate::shard::{list_shards, rotate_if_needed, shard_name, split_base, Shard};

/// Page size used when deleting by query.
const DELETE_PAGE_SIZE: usize = 1000;

/// Capacity of the stream handed back by `find_many`.
const RESULT_CHANNEL_CAPACITY: usize = 64;

/// Everything that exists only while the indexer is open.
pub(crate) struct OpenState {
    pub shards: Arc<RwLock<Vec<Shard>>>,
    pub inserts: mpsc::Sender<Value>,
    pub deletes: mpsc::Sender<String>,
    pub force_flush: mpsc::Sender<()>,
    pub shutdown: watch::Sender<bool>,
    pub worker: JoinHandle<()>,
}

/// Rotating full-text indexer with a unified search surface.
pub struct Indexer {
    pub(crate) config: IndexConfig,
    pub(crate) codec: Arc<RwLock<Arc<dyn Codec>>>,
    pub(crate) metrics: Metrics,
    pub(crate) state: Mutex<Option<OpenState>>,
}

impl Indexer {
    /// Create an indexer. Fails when the configured rotation size is
    /// neither `-1` nor at least [`kiroku_core::MIN_ROTATION_SIZE`].
    pub fn new(config: IndexConfig, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            codec: Arc::new(RwLock::new(codec)),
            metrics: Metrics::new(),
            state: Mutex::new(None),
        })
    }

    /// Discover and open every shard, then start the ingest worker.
    ///
    /// Unreadable non-active shards are skipped with a warning; the
    /// indexer still opens as long as the active shard opens or can be
    /// created. Opening an already-open indexer is an error; re-opening
    /// after [`Indexer::close`] is fine.
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(Error::bad_request("indexer is already open"));
        }

        let codec = self.codec.read().clone();
        let schema = codec.schema();
        let mut shards: Vec<Shard> = Vec::new();

        if self.config.is_in_memory() {
            shards.push(Shard::open("in-memory".to_string(), None, &schema)?);
        } else {
            let (parent, base) = split_base(&self.config.base_path)?;
            fs::create_dir_all(&parent)
                .map_err(|e| Error::io("creating index parent directory", e))?;

            let existing = list_shards(&self.config.base_path, true)?;
            for name in &existing {
                let path = parent.join(name);
                match Shard::open(name.clone(), Some(&path), &schema) {
                    Ok(shard) => shards.push(shard),
                    Err(e) => warn!(shard = %name, error = %e, "cannot open shard, skipping"),
                }
            }
            if shards.is_empty() {
                let name = shard_name(&base, 0);
                shards.push(Shard::open(name, Some(&self.config.base_path), &schema)?);
            }
        }

        if let Some(active) = shards.last_mut() {
            active.ensure_writer()?;
        }
        let shard_count = shards.len();
        let shards = Arc::new(RwLock::new(shards));

        rotate_if_needed(&self.config, &shards, &schema, &self.metrics);

        let capacity = if self.config.sync_submit {
            1
        } else {
            self.config.buffered_chan_size.max(1)
        };
        let (insert_tx, insert_rx) = mpsc::channel(capacity);
        let (delete_tx, delete_rx) = mpsc::channel(capacity);
        let (flush_tx, flush_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = IngestWorker {
            config: self.config.clone(),
            codec: self.codec.clone(),
            shards: shards.clone(),
            metrics: self.metrics.clone(),
            inserts: insert_rx,
            deletes: delete_rx,
            force_flush: flush_rx,
            shutdown: shutdown_rx,
            batch: None,
        };
        let worker = tokio::spawn(worker.run());

        *state = Some(OpenState {
            shards,
            inserts: insert_tx,
            deletes: delete_tx,
            force_flush: flush_tx,
            shutdown: shutdown_tx,
            worker,
        });
        info!(path = %self.config.base_path.display(), shards = shard_count, "indexer opened");
        Ok(())
    }

    /// Flush, stop the worker, and release every shard handle. Waits for
    /// the worker to exit, so pending submissions are drained and the
    /// on-disk state is quiesced when this returns. Calling `close` on a
    /// closed indexer is a no-op.
    pub async fn close(&self) -> Result<()> {
        let Some(state) = self.state.lock().take() else {
            return Ok(());
        };
        let OpenState {
            shutdown, worker, ..
        } = state;
        let _ = shutdown.send(true);
        let _ = worker.await;
        info!(path = %self.config.base_path.display(), "indexer closed");
        Ok(())
    }

    /// Submit one payload for indexing.
    ///
    /// In buffered mode this never blocks: a full channel drops the
    /// payload silently (the drop is counted in the metrics). A closed
    /// indexer swallows the submission.
    pub async fn insert_one(&self, payload: Value) -> Result<()> {
        let sender = self.state.lock().as_ref().map(|s| s.inserts.clone());
        let Some(sender) = sender else {
            return Ok(());
        };
        if self.config.sync_submit {
            if sender.send(payload).await.is_ok() {
                self.metrics.record_submit();
            }
        } else {
            match sender.try_send(payload) {
                Ok(()) => self.metrics.record_submit(),
                Err(mpsc::error::TrySendError::Full(_)) => self.metrics.record_drop(),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    /// Submit one document identifier for deletion from the active shard.
    /// Same backpressure contract as [`Indexer::insert_one`].
    pub async fn delete_one(&self, id: &str) -> Result<()> {
        let sender = self.state.lock().as_ref().map(|s| s.deletes.clone());
        let Some(sender) = sender else {
            return Ok(());
        };
        if self.config.sync_submit {
            if sender.send(id.to_string()).await.is_ok() {
                self.metrics.record_delete();
            }
        } else {
            match sender.try_send(id.to_string()) {
                Ok(()) => self.metrics.record_delete(),
                Err(mpsc::error::TrySendError::Full(_)) => self.metrics.record_drop(),
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        Ok(())
    }

    /// Ask the worker to flush the pending batch. Best-effort and
    /// non-blocking; a flush already queued absorbs the request.
    pub fn flush(&self) {
        if let Some(state) = self.state.lock().as_ref() {
            let _ = state.force_flush.try_send(());
        }
    }

    /// Replace the codec used for marshalling, querying, and decoding.
    pub fn set_codec(&self, codec: Arc<dyn Codec>) {
        *self.codec.write() = codec;
    }

    /// Snapshot of the ingest/query counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Search every shard and stream decoded results.
    ///
    /// The query is translated by the current codec, or by `codec` when
    /// one is supplied for this call. Hits arrive first, ordered by
    /// descending score across all shards; facet values follow when the
    /// codec can decode them. Hits the codec cannot decode are skipped.
    /// Dropping the receiver stops the stream.
    pub async fn find_many(
        &self,
        query: &Value,
        offset: usize,
        limit: usize,
        codec: Option<Arc<dyn Codec>>,
    ) -> Result<mpsc::Receiver<SearchItem>> {
        let shards = self.open_shards()?;
        let codec = codec.unwrap_or_else(|| self.codec.read().clone());
        let request = codec.build_query(query, offset, limit)?;

        self.metrics.record_query();
        let output = tokio::task::spawn_blocking(move || {
            let shards = shards.read();
            search_shards(&shards, &request)
        })
        .await
        .map_err(|_| Error::Cancelled)?;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                self.metrics.record_query_error();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for hit in &output.hits {
                match codec.unmarshal(hit) {
                    Ok(value) => {
                        if tx.send(SearchItem::Hit(value)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => debug!(id = %hit.id, error = %e, "skipping undecodable hit"),
                }
            }
            if let Some(parser) = codec.facet_parser() {
                let mut decoded = Vec::new();
                for facet in &output.facets {
                    parser.unmarshal_facet(facet, &mut decoded);
                }
                for value in decoded {
                    if tx.send(SearchItem::Facet(value)).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }

    /// Delete every document on the **active shard** matching a query
    /// string, returning how many deletions were attempted. Older shards
    /// are immutable and not touched. Rejects empty or non-string
    /// queries.
    pub async fn delete_many(&self, query: &Value) -> Result<u32> {
        let Some(text) = query.as_str() else {
            return Err(Error::bad_request("delete_many expects a query string"));
        };
        if text.is_empty() {
            return Err(Error::bad_request("cannot pass an empty query for deletion"));
        }

        let shards = self.open_shards()?;
        let codec = self.codec.read().clone();
        let request = codec.build_query(&Value::String(text.to_string()), 0, DELETE_PAGE_SIZE)?;

        tokio::task::spawn_blocking(move || {
            let shards = shards.read();
            let Some(active) = shards.last() else {
                return Err(Error::bad_request("indexer is not open"));
            };
            let Some(writer) = active.writer.clone() else {
                return Err(Error::bad_request("active shard has no writer"));
            };
            let schema = active.index.schema();
            let id_field = schema
                .get_field(ID_FIELD)
                .map_err(|e| Error::engine("schema has no identity field", e))?;

            let mut count: u32 = 0;
            loop {
                active
                    .reader
                    .reload()
                    .map_err(|e| Error::engine("cannot refresh active shard", e))?;
                let searcher = active.reader.searcher();
                let (total, page) = searcher
                    .search(
                        request.query.as_ref(),
                        &(Count, TopDocs::with_limit(DELETE_PAGE_SIZE)),
                    )
                    .map_err(|e| {
                        warn!(deleted = count, error = %e, "delete_many aborted mid-page");
                        Error::engine("delete query failed on active shard", e)
                    })?;
                if page.is_empty() {
                    break;
                }

                let before = count;
                let mut writer = writer.lock();
                for (_score, address) in &page {
                    let doc: TantivyDocument = searcher
                        .doc(*address)
                        .map_err(|e| Error::engine("cannot load matched document", e))?;
                    if let Some(id) = doc.get_first(id_field).and_then(|v| v.as_str()) {
                        writer.delete_term(Term::from_field_text(id_field, id));
                        count += 1;
                    }
                }
                writer.commit().map_err(|e| {
                    warn!(deleted = count, error = %e, "delete_many aborted on commit");
                    Error::engine("cannot commit deletions", e)
                })?;
                drop(writer);

                // No identifiable documents left in the page means no
                // further search round can make progress either.
                if total <= DELETE_PAGE_SIZE || count == before {
                    break;
                }
            }
            Ok(count)
        })
        .await
        .map_err(|_| Error::Cancelled)?
    }

    pub(crate) fn open_shards(&self) -> Result<Arc<RwLock<Vec<Shard>>>> {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.shards.clone())
            .ok_or_else(|| Error::bad_request("indexer is not open"))
    }
}

//! Offline maintenance: full rebuild and size-bounded purge.
//!
//! Both operations close the indexer, restructure the shard directories,
//! and re-open. They must not run concurrently with each other; steady
//! ingest submissions made while one runs are swallowed like any other
//! submission against a closed indexer.

use std::fs;

use tantivy::query::AllQuery;
use tracing::{info, warn};
use uuid::Uuid;

use kiroku_core::{Error, Result};

use crate::alias::search_shards;
use crate::codec::SearchRequest;
use crate::indexer::Indexer;
use crate::shard::{disk_usage, list_shards, split_base};

/// Page size used when walking the whole index during a rebuild.
const RESYNC_PAGE_SIZE: usize = 5000;

impl Indexer {
    /// Rebuild every shard by round-tripping each stored document through
    /// the current codec.
    ///
    /// A duplicate indexer is opened inside a scratch sibling directory,
    /// every document is decoded and re-submitted to it, then the rebuilt
    /// shards replace the originals and the indexer re-opens. Progress
    /// lines go to `progress`. A failure mid-way aborts and may leave
    /// partial state on disk; the next open tolerates missing shards.
    pub async fn resync(&self, mut progress: impl FnMut(&str)) -> Result<()> {
        if self.config.is_in_memory() {
            return Err(Error::bad_request("resync requires an on-disk index"));
        }
        let (parent, base) = split_base(&self.config.base_path)?;

        let scratch = parent.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&scratch).map_err(|e| Error::io("creating scratch directory", e))?;

        let mut dup_config = self.config.clone();
        dup_config.base_path = scratch.join(&base);
        // Blocking handoff: the rebuild must not shed documents under
        // backpressure the way steady-state ingest is allowed to.
        dup_config.sync_submit = true;

        let codec = self.codec.read().clone();
        let duplicate = Indexer::new(dup_config.clone(), codec.clone())?;
        duplicate.open().await?;
        progress("rebuilding shards into a scratch index");

        let mut page = 0usize;
        loop {
            progress(&format!("reindexing documents from page {page}"));
            let request = SearchRequest {
                query: Box::new(AllQuery),
                offset: page * RESYNC_PAGE_SIZE,
                limit: RESYNC_PAGE_SIZE,
                facets: Vec::new(),
            };
            let shards = self.open_shards()?;
            let output = tokio::task::spawn_blocking(move || {
                let shards = shards.read();
                search_shards(&shards, &request)
            })
            .await
            .map_err(|_| Error::Cancelled)??;

            for hit in &output.hits {
                match codec.unmarshal(hit) {
                    Ok(payload) => duplicate.insert_one(payload).await?,
                    Err(e) => {
                        warn!(id = %hit.id, error = %e, "skipping undecodable document");
                    }
                }
            }
            if output.total <= (page + 1) * RESYNC_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        self.close().await?;
        duplicate.close().await?;

        progress("removing old shards");
        for name in list_shards(&self.config.base_path, false)? {
            fs::remove_dir_all(parent.join(&name))
                .map_err(|e| Error::io(format!("removing shard {name}"), e))?;
        }

        progress("installing rebuilt shards");
        for name in list_shards(&dup_config.base_path, false)? {
            fs::rename(scratch.join(&name), parent.join(&name))
                .map_err(|e| Error::io(format!("installing shard {name}"), e))?;
        }
        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!(error = %e, "cannot remove scratch directory");
        }

        progress("re-opening indexer");
        self.open().await?;
        progress("resync done");
        Ok(())
    }

    /// Cap the total on-disk footprint to `max` bytes by deleting the
    /// oldest shards.
    ///
    /// Walking from the newest shard backwards, cumulative disk usage is
    /// accumulated; the shard that pushes the total past `max` and every
    /// older shard are deleted. Survivors are renumbered on re-open so
    /// ordinal 0 is again the oldest shard. Shards that fail to measure
    /// stay uncounted and are kept.
    pub async fn truncate(&self, max: u64, mut progress: impl FnMut(&str)) -> Result<()> {
        if self.config.is_in_memory() {
            return Err(Error::bad_request("truncate requires an on-disk index"));
        }
        let (parent, _base) = split_base(&self.config.base_path)?;

        progress("closing indexer, waiting for the writer to drain");
        self.close().await?;

        progress("purging oldest shards");
        let names = list_shards(&self.config.base_path, false)?;
        let mut total = 0u64;
        let mut remove = false;
        for name in names.iter().rev() {
            let path = parent.join(name);
            if !remove {
                match disk_usage(&path) {
                    Ok(usage) => {
                        total += usage;
                        remove = total > max;
                    }
                    Err(e) => {
                        warn!(shard = %name, error = %e, "cannot measure shard, keeping it");
                        continue;
                    }
                }
            }
            if remove {
                match fs::remove_dir_all(&path) {
                    Ok(()) => info!(shard = %name, "removed shard"),
                    Err(e) => progress(&format!("cannot remove shard {name}: {e}")),
                }
            }
        }

        progress("re-opening indexer");
        self.open().await?;
        progress("truncate done");
        Ok(())
    }
}

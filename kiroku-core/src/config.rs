//! # Configuration Management
//!
//! Configuration for the Kiroku indexer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity of the insert/delete submission channels in buffered mode.
pub const BUFFERED_CHAN_SIZE: usize = 10_000;

/// Smallest accepted rotation threshold, in bytes.
///
/// An empty on-disk shard already occupies a few tens of kilobytes, so any
/// smaller threshold would rotate on every flush.
pub const MIN_ROTATION_SIZE: i64 = 68 * 1024;

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory of the ordinal-0 shard. Rotated shards are created as
    /// `<base_path>.NNNN` siblings. An empty path selects a single
    /// in-memory shard (rotation disabled).
    pub base_path: PathBuf,

    /// Rotate the active shard once its on-disk size exceeds this many
    /// bytes. `-1` disables rotation; any other value must be at least
    /// [`MIN_ROTATION_SIZE`].
    pub rotation_size: i64,

    /// Submission channel capacity in buffered mode.
    pub buffered_chan_size: usize,

    /// When set, submissions block until the ingest worker picks them up
    /// instead of being dropped under backpressure. Intended for tests and
    /// for callers that need deterministic handoff.
    pub sync_submit: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/kiroku"),
            rotation_size: 256 * 1024 * 1024,
            buffered_chan_size: BUFFERED_CHAN_SIZE,
            sync_submit: false,
        }
    }
}

impl IndexConfig {
    /// Validate the configured rotation size.
    ///
    /// Accepted values are `-1` (rotation disabled) or anything at or
    /// above [`MIN_ROTATION_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if self.rotation_size < -1 {
            return Err(Error::bad_request(
                "rotation size must be -1 or a positive byte count",
            ));
        }
        if self.rotation_size > -1 && self.rotation_size < MIN_ROTATION_SIZE {
            return Err(Error::bad_request(format!(
                "use a rotation size bigger than {MIN_ROTATION_SIZE}"
            )));
        }
        Ok(())
    }

    /// Whether this configuration selects an in-memory index.
    pub fn is_in_memory(&self) -> bool {
        self.base_path.as_os_str().is_empty()
    }
}

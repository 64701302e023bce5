//! Shard discovery, naming, and lifecycle.
//!
//! A shard is one directory holding a tantivy index. Shards of an indexer
//! sit side by side in the parent of the configured base path: the
//! ordinal-0 shard keeps the bare base name, rotated shards append a
//! zero-padded numeric suffix (`log`, `log.0001`, `log.0002`, ...). The
//! fixed-width suffix makes lexicographic order equal ordinal order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tantivy::schema::Schema;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{info, warn};

use kiroku_core::{Error, IndexConfig, Metrics, Result};

/// Memory budget handed to the active shard's writer.
const WRITER_HEAP_BYTES: usize = 50 * 1024 * 1024;

/// Temporary suffix used while renumbering shard directories.
const RENAME_SUFFIX: &str = "-rename";

/// One open shard.
pub(crate) struct Shard {
    pub name: String,
    /// Directory of the shard, `None` for the in-memory variant.
    pub path: Option<PathBuf>,
    pub index: Index,
    pub reader: IndexReader,
    /// Present only on the active (highest-ordinal) shard. Shared with
    /// `delete_many`, which writes concurrently with the ingest worker.
    pub writer: Option<Arc<Mutex<IndexWriter>>>,
}

impl Shard {
    /// Open the shard at `path`, creating a fresh index when it cannot be
    /// opened. `None` opens an in-memory shard instead.
    pub fn open(name: String, path: Option<&Path>, schema: &Schema) -> Result<Self> {
        let index = match path {
            Some(dir) => match Index::open_in_dir(dir) {
                Ok(index) => index,
                Err(open_err) => {
                    if let Err(e) = fs::create_dir_all(dir) {
                        return Err(Error::OpenFailed {
                            path: dir.to_path_buf(),
                            message: format!("open: {open_err}; mkdir: {e}"),
                        });
                    }
                    match Index::create_in_dir(dir, schema.clone()) {
                        Ok(index) => index,
                        Err(create_err) => {
                            return Err(Error::OpenFailed {
                                path: dir.to_path_buf(),
                                message: format!("open: {open_err}; create: {create_err}"),
                            })
                        }
                    }
                }
            },
            None => Index::create_in_ram(schema.clone()),
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| Error::engine("cannot open shard reader", e))?;

        Ok(Self {
            name,
            path: path.map(Path::to_path_buf),
            index,
            reader,
            writer: None,
        })
    }

    /// Make this shard the writer by attaching an engine writer to it.
    pub fn ensure_writer(&mut self) -> Result<()> {
        if self.writer.is_none() {
            let writer: IndexWriter = self
                .index
                .writer_with_num_threads(1, WRITER_HEAP_BYTES)
                .map_err(|e| Error::engine(format!("cannot open writer for {}", self.name), e))?;
            self.writer = Some(Arc::new(Mutex::new(writer)));
        }
        Ok(())
    }

    /// Drop the writer when the shard stops being the active one.
    pub fn retire_writer(&mut self) {
        self.writer = None;
    }
}

/// Split a base path into its parent directory and leaf name.
pub(crate) fn split_base(base_path: &Path) -> Result<(PathBuf, String)> {
    let leaf = base_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::bad_request("base path has no directory name"))?;
    let parent = base_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok((parent, leaf))
}

/// Shard directory name for an ordinal: the bare base for 0, a fixed-width
/// numeric suffix otherwise.
pub(crate) fn shard_name(base: &str, ordinal: usize) -> String {
    if ordinal == 0 {
        base.to_string()
    } else {
        format!("{base}.{ordinal:04}")
    }
}

fn is_shard_name(name: &str, base: &str) -> bool {
    if name == base {
        return true;
    }
    match name.strip_prefix(base).and_then(|rest| rest.strip_prefix('.')) {
        Some(suffix) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// List shard directory names under the parent of `base_path`, in ordinal
/// order. A missing parent directory yields an empty listing.
///
/// With `rename_if_gapped`, leftovers of an interrupted renumbering are
/// swept first, and a listing whose ordinal-0 shard is gone (oldest shards
/// were removed) is renumbered back to contiguity: every shard moves to a
/// temporary `-rename` name, then back into `base`, `base.0001`, ... in
/// the original relative order.
pub(crate) fn list_shards(base_path: &Path, rename_if_gapped: bool) -> Result<Vec<String>> {
    let (parent, base) = split_base(base_path)?;

    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("listing shard directory", e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io("inspecting shard directory entry", e))?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if rename_if_gapped && name.ends_with(RENAME_SUFFIX) {
            let stem = &name[..name.len() - RENAME_SUFFIX.len()];
            if is_shard_name(stem, &base) {
                warn!(shard = %name, "sweeping leftover of an interrupted renumbering");
                let _ = fs::remove_dir_all(entry.path());
                continue;
            }
        }
        if is_shard_name(&name, &base) {
            names.push(name);
        }
    }
    names.sort();

    if rename_if_gapped && !names.is_empty() && names[0] != base {
        info!(base = %base, "renumbering shards after removal of the oldest");
        for name in &names {
            let src = parent.join(name);
            let tmp = parent.join(format!("{name}{RENAME_SUFFIX}"));
            fs::rename(&src, &tmp).map_err(|e| Error::io(format!("renaming shard {name}"), e))?;
        }
        for (ordinal, name) in names.iter().enumerate() {
            let src = parent.join(format!("{name}{RENAME_SUFFIX}"));
            let dst = parent.join(shard_name(&base, ordinal));
            fs::rename(&src, &dst).map_err(|e| Error::io(format!("renaming shard {name}"), e))?;
        }
        return list_shards(base_path, false);
    }

    Ok(names)
}

/// Recursively sum file sizes under a shard directory.
pub(crate) fn disk_usage(path: &Path) -> Result<u64> {
    let mut size = 0u64;
    let entries =
        fs::read_dir(path).map_err(|e| Error::io(format!("measuring {}", path.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(format!("measuring {}", path.display()), e))?;
        let metadata = entry
            .metadata()
            .map_err(|e| Error::io(format!("measuring {}", path.display()), e))?;
        if metadata.is_dir() {
            size += disk_usage(&entry.path())?;
        } else {
            size += metadata.len();
        }
    }
    Ok(size)
}

/// Measure the active shard and open a successor when it grew past the
/// configured threshold. Runs after every flush and once at open time.
/// Measurement failures are logged and skipped; the next flush retries.
pub(crate) fn rotate_if_needed(
    config: &IndexConfig,
    shards: &RwLock<Vec<Shard>>,
    schema: &Schema,
    metrics: &Metrics,
) {
    if config.rotation_size < 0 || config.is_in_memory() {
        return;
    }

    let (active_path, ordinal) = {
        let shards = shards.read();
        let Some(active) = shards.last() else { return };
        let Some(path) = active.path.clone() else { return };
        (path, shards.len())
    };

    let usage = match disk_usage(&active_path) {
        Ok(usage) => usage,
        Err(e) => {
            warn!(error = %e, "cannot compute disk usage for active shard");
            return;
        }
    };
    if usage <= config.rotation_size as u64 {
        return;
    }

    let (parent, base) = match split_base(&config.base_path) {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "cannot derive shard naming from base path");
            return;
        }
    };
    let name = shard_name(&base, ordinal);
    let path = parent.join(&name);

    let mut successor = match Shard::open(name.clone(), Some(&path), schema) {
        Ok(shard) => shard,
        Err(e) => {
            warn!(shard = %name, error = %e, "cannot create rotation shard");
            return;
        }
    };
    if let Err(e) = successor.ensure_writer() {
        warn!(shard = %name, error = %e, "cannot open writer on rotation shard");
        return;
    }

    info!(shard = %name, usage, "rotating to a new shard");
    let mut shards = shards.write();
    if let Some(previous) = shards.last_mut() {
        previous.retire_writer();
    }
    shards.push(successor);
    metrics.record_rotation();
}

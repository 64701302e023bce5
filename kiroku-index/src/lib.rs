//! # Kiroku Index
//!
//! Rotating, append-mostly full-text index service for audit and technical
//! log records, built on tantivy shards.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Write Path                            │
//! │                                                              │
//! │  insert/delete ──> Channel ──> Ingest Worker ──> Batch       │
//! │                                     │              │         │
//! │                                     ▼              ▼ Flush   │
//! │                               Idle / Size      Active Shard  │
//! │                               Thresholds           │         │
//! │                                                    ▼         │
//! │                                              Rotation Check  │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Read Path                             │
//! │                                                              │
//! │  Query ──> Codec ──> Alias fan-out over every shard          │
//! │                          │                                   │
//! │                          ▼                                   │
//! │                  Merge by score, decode hits, stream         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shards live side by side on disk as `<base>` plus `<base>.0001`,
//! `<base>.0002`, and so on. The highest ordinal is the only writer;
//! older shards stay searchable until `truncate` removes them.

mod alias;
mod batch;
pub mod codec;
pub mod indexer;
mod ingest;
mod maintenance;
mod shard;

pub use codec::{
    Codec, FacetParser, FacetRequest, FacetResult, Hit, JsonCodec, SearchItem, SearchRequest,
    ID_FIELD, PAYLOAD_FIELD,
};
pub use indexer::Indexer;

pub use kiroku_core::{
    Error, IndexConfig, Metrics, MetricsSnapshot, Result, BUFFERED_CHAN_SIZE, MIN_ROTATION_SIZE,
};

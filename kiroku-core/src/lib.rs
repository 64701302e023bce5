//! # Kiroku Core
//!
//! Engine-agnostic building blocks shared by the Kiroku index service:
//! - Error types
//! - Configuration structures
//! - Metrics collection
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   kiroku-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • error      - Error handling                  │
//! │  • config     - Indexer configuration           │
//! │  • metrics    - Atomic counters and snapshots   │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{IndexConfig, BUFFERED_CHAN_SIZE, MIN_ROTATION_SIZE};
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

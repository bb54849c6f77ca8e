//! Batch log engine
//!
//! This crate orchestrates the lower layers:
//! - BatchlogManager: submission, direct-delivery removal, counters
//! - Replay: the bounded scan-decode-apply-delete pass
//! - ReplayHandle: single-flight, awaitable, cancellable passes
//! - ReplayScheduler: periodic background trigger
//! - Configuration via `batchlog.toml`
//!
//! The engine is the only component that knows about:
//! - Replay eligibility and the apply deadline
//! - Cross-layer coordination (store + codec + write path)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply_pool;
pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
pub mod metrics;
mod replay; // Pass internals, driven through the manager
pub mod scheduler;

pub use apply_pool::{ApplyPool, BackpressureError, PoolStats};
pub use config::{BatchlogConfig, ConfigError, CONFIG_FILE_NAME};
pub use error::{BatchlogError, ReplayError};
pub use handle::{CancelToken, ReplayHandle};
pub use manager::BatchlogManager;
pub use metrics::{BatchlogMetrics, ReplayCounters, ReplayReport};
pub use scheduler::ReplayScheduler;
